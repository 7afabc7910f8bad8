pub mod config;
pub mod engine;
pub mod handlers;
pub mod humanize;
pub mod ledger;
pub mod manager;
pub mod probe;
