// Logical→transport destination mapping.
//
// Applied uniformly at submission time, before a message enters the
// delivery queue, so queue keys and wire paths always agree.

use super::message::AgentMessageDestination;

/// Maps a logical destination to its transport-specific form.
pub trait DestinationMapper: Send + Sync {
    fn map(&self, destination: AgentMessageDestination) -> AgentMessageDestination;
}

/// Prefixes targets with the agent instance path:
/// `{verb, target}` → `{verb, "agent/{instance_id}/{target}"}`.
#[derive(Debug, Clone)]
pub struct InstanceDestinationMapper {
    instance_id: String,
}

impl InstanceDestinationMapper {
    pub fn new(instance_id: impl Into<String>) -> Self {
        InstanceDestinationMapper {
            instance_id: instance_id.into(),
        }
    }
}

impl DestinationMapper for InstanceDestinationMapper {
    fn map(&self, destination: AgentMessageDestination) -> AgentMessageDestination {
        AgentMessageDestination {
            verb: destination.verb,
            target: format!("agent/{}/{}", self.instance_id, destination.target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_instance_maps_to_the_prefixed_path() {
        let mapper = InstanceDestinationMapper::new("abc123");
        let mapped = mapper.map(AgentMessageDestination::put("instance"));
        assert_eq!(mapped.target, "agent/abc123/instance");
        assert_eq!(mapped.verb, super::super::message::DestinationVerb::Put);
    }

    #[test]
    fn verb_is_preserved() {
        let mapper = InstanceDestinationMapper::new("abc123");
        let mapped = mapper.map(AgentMessageDestination::post("coverage"));
        assert_eq!(mapped.target, "agent/abc123/coverage");
        assert_eq!(mapped.verb, super::super::message::DestinationVerb::Post);
    }
}
