// Agent identity metadata carried by the attach handshake.

use serde::{Deserialize, Serialize};

/// Identity of this agent instance, serialized as the opaque attach blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetadata {
    /// Stable agent identifier across restarts.
    pub id: String,
    /// Identifier of this process's instance, fresh per attach.
    pub instance_id: String,
    /// Build version of the instrumented application.
    pub build_version: String,
    /// Service group this agent reports under.
    #[serde(default)]
    pub group_id: String,
    /// Version of the agent itself.
    #[serde(default)]
    pub agent_version: String,
    /// Package prefixes selected for instrumentation.
    #[serde(default)]
    pub packages_prefixes: Vec<String>,
}

impl AgentMetadata {
    /// Serializes the metadata into the attach handshake payload.
    pub fn to_attach_blob(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Fresh instance identifier for this process, used when the embedder
    /// does not supply one explicitly.
    pub fn fresh_instance_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
