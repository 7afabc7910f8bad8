//! Protocol dispatch layer.
//!
//! A resource identifier is resolved to the first registered handler
//! whose predicate accepts it; the handler runs the transfer and returns
//! a terminal [`types::TransferRecord`]. The HTTP handler is backed by
//! the download engine; other transports are opaque capability slots
//! honoring the same record contract.

pub mod extended;
pub mod http;
pub mod media;
pub mod registry;
pub mod torrent;
pub mod traits;
pub mod types;

pub use extended::{FtpHandler, HlsHandler, SftpHandler, WebDavHandler};
pub use http::HttpHandler;
pub use media::MediaHandler;
pub use registry::{ProtocolRegistry, RegistryError};
pub use torrent::TorrentHandler;
pub use traits::ProtocolHandler;
pub use types::{TransferRecord, TransferStatus, TransferUpdate};
