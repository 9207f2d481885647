// Environment-derived agent configuration.
//
// `providers` implements the layered configuration-provider chain and the
// installation-directory resolution; `metadata` is the agent identity blob
// the attach handshake carries.

pub mod metadata;
pub mod providers;

pub use metadata::AgentMetadata;
pub use providers::{
    ConfigurationProvider, InstallationDirProvider, MapConfigurationProvider, INSTALLATION_DIR,
};
