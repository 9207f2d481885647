// Message transport to the remote controller.
//
// `message` holds the transport-independent message model, `mapper` the
// logical→transport destination transform, `queue` the bounded
// per-destination delivery queue, `sender` the attach handshake and
// background dispatch, and `http` the reqwest-backed wire implementation.

pub mod http;
pub mod mapper;
pub mod message;
pub mod queue;
pub mod sender;

pub use http::{resolve_truststore_path, HttpAgentMessageTransport};
pub use mapper::{DestinationMapper, InstanceDestinationMapper};
pub use message::{AgentMessage, AgentMessageDestination, DestinationVerb, ResponseStatus};
pub use queue::DeliveryQueue;
pub use sender::{
    AgentMessageSender, AgentMessageTransport, AttachState, TransportConfig, TransportError,
};
