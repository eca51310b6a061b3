//! Registry of meeting types agents can invite a human to.

use serde::{Deserialize, Serialize};

/// Trigger raised when a task's retries stop improving.
pub const CONVERGENCE_STALLED: &str = "convergence_stalled";

/// Event that makes a meeting relevant, optionally narrowed by a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingTrigger {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeetingType {
    pub id: String,
    pub name: String,
    /// Agent that hosts the meeting
    pub agent_name: String,
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<MeetingTrigger>,
}

impl MeetingType {
    pub fn is_triggered_by(&self, event: &str) -> bool {
        self.triggers.iter().any(|t| t.event == event)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeetingRegistry {
    types: Vec<MeetingType>,
}

impl MeetingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in debug meeting.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(MeetingType {
            id: "debug-convergence".into(),
            name: "Debug Session".into(),
            agent_name: "Bug Detective".into(),
            description: "Work through a failing task together when retries stop making progress."
                .into(),
            triggers: vec![MeetingTrigger {
                event: CONVERGENCE_STALLED.into(),
                filter: None,
            }],
        });
        registry
    }

    /// Add a meeting type, replacing any registered under the same id.
    pub fn register(&mut self, meeting: MeetingType) {
        match self.types.iter_mut().find(|m| m.id == meeting.id) {
            Some(existing) => *existing = meeting,
            None => self.types.push(meeting),
        }
    }

    pub fn get(&self, id: &str) -> Option<&MeetingType> {
        self.types.iter().find(|m| m.id == id)
    }

    pub fn list(&self) -> &[MeetingType] {
        &self.types
    }

    /// First registered debug meeting bound to `event`.
    pub fn find_debug_meeting(&self, event: &str) -> Option<&MeetingType> {
        self.types
            .iter()
            .find(|m| m.id.contains("debug") && m.is_triggered_by(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_include_debug_meeting() {
        let registry = MeetingRegistry::with_defaults();
        let meeting = registry.find_debug_meeting(CONVERGENCE_STALLED).unwrap();
        assert_eq!(meeting.id, "debug-convergence");
        assert!(registry.find_debug_meeting("deploy_failed").is_none());
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = MeetingRegistry::with_defaults();
        let mut meeting = registry.get("debug-convergence").unwrap().clone();
        meeting.agent_name = "Pixel".into();
        registry.register(meeting);

        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.get("debug-convergence").unwrap().agent_name, "Pixel");
    }

    #[test]
    fn test_non_debug_meetings_are_not_offered_for_stalls() {
        let mut registry = MeetingRegistry::new();
        registry.register(MeetingType {
            id: "design-review".into(),
            name: "Design Review".into(),
            agent_name: "Ada".into(),
            description: String::new(),
            triggers: vec![MeetingTrigger {
                event: CONVERGENCE_STALLED.into(),
                filter: None,
            }],
        });
        assert!(registry.find_debug_meeting(CONVERGENCE_STALLED).is_none());
    }
}
