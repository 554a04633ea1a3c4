mod tls;
pub mod transport;

pub use tls::{CertificateValidator, PinnedCertificate};
pub use transport::{
    ChannelRequest, ChannelSender, Connector, Outgoing, PeerChannel, TransportChannel,
    TransportEvent, WebSocketConnector,
};
