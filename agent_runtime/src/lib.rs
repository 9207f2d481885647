// Runtime half of the instrumentation agent: request-context correlation
// across execution units, and reliable delivery of telemetry to the remote
// controller.
//
// The transformation policy lives in the sibling `weave_engine` crate; code
// injected by it calls into `context` at request boundaries and enqueues
// messages through `transport`.

pub mod configuration;
pub mod context;
pub mod transport;

pub use configuration::{
    AgentMetadata, ConfigurationProvider, InstallationDirProvider, MapConfigurationProvider,
    INSTALLATION_DIR,
};

pub use context::{
    propagate, propagate_for, ChannelFlavor, ContextScope, ContextSnapshot, ContextStore,
    PropagationPolicy, RequestContext, SESSION_ID_HEADER,
};

pub use transport::{
    AgentMessage, AgentMessageDestination, AgentMessageSender, AgentMessageTransport, AttachState,
    DestinationMapper, DestinationVerb, HttpAgentMessageTransport, InstanceDestinationMapper,
    ResponseStatus, TransportConfig, TransportError,
};
