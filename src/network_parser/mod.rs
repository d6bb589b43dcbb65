//! 网络层：阻塞 HTTP 传输、NexusMods 与 GameBanana 接口定义。

pub mod gamebanana;
pub mod network;
pub mod nexus;

pub use gamebanana::GameBananaEndpoints;
pub use network::{HttpTransport, Transport, TransportError, TransportOptions};
pub use nexus::{ApiAuth, NexusEndpoints};
