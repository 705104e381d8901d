pub mod connection;
pub mod messages;
pub mod protocol;
pub mod transport;

pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionSession, ConnectionState, ConnectionStats,
};
pub use protocol::{parse_pcm_rate, ProtocolDecoder, ProtocolMessage, DEFAULT_PLAYBACK_RATE};
pub use transport::{Connector, Frame, Transport, WsConnector};
