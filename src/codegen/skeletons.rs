//! Skeleton selection.
//!
//! Event handling, memory and analytics are full agent templates, so exactly
//! one of them is the primary skeleton. Precedence is the order of
//! [`PRIMARY_SKELETONS`], evaluated once, first match wins.

use super::python_codegen::AgentCodeGenerator;
use super::CompositionMode;
use crate::extract::UnifiedConfiguration;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Skeleton {
    Standard,
    Analytics,
    Memory,
    EventHandling,
    Combined,
}

impl Skeleton {
    pub fn as_str(self) -> &'static str {
        match self {
            Skeleton::Standard => "standard",
            Skeleton::Analytics => "analytics",
            Skeleton::Memory => "memory",
            Skeleton::EventHandling => "event_handling",
            Skeleton::Combined => "combined",
        }
    }

    /// Human readable title used in the module docstring
    pub fn title(self) -> &'static str {
        match self {
            Skeleton::Standard => "Google ADK Agent",
            Skeleton::Analytics => "Google ADK Agent with Langfuse Analytics",
            Skeleton::Memory => "Google ADK Agent with Mem0 Memory",
            Skeleton::EventHandling => "Google ADK Agent with Event Handling",
            Skeleton::Combined => "Google ADK Agent with Combined Integrations",
        }
    }

    /// Side feature this skeleton renders, if it is a primary skeleton
    pub fn feature(self) -> Option<&'static str> {
        match self {
            Skeleton::Analytics => Some("langfuse"),
            Skeleton::Memory => Some("memory"),
            Skeleton::EventHandling => Some("event_handling"),
            Skeleton::Standard | Skeleton::Combined => None,
        }
    }
}

/// A primary skeleton and the predicate that claims it
pub struct SkeletonEntry {
    pub skeleton: Skeleton,
    pub applies: fn(&UnifiedConfiguration) -> bool,
}

/// Primary skeletons in precedence order
pub const PRIMARY_SKELETONS: &[SkeletonEntry] = &[
    SkeletonEntry {
        skeleton: Skeleton::EventHandling,
        applies: |config| config.event_handling().is_some(),
    },
    SkeletonEntry {
        skeleton: Skeleton::Memory,
        applies: |config| config.memory().is_some(),
    },
    SkeletonEntry {
        skeleton: Skeleton::Analytics,
        applies: |config| config.langfuse().is_some(),
    },
];

/// Skeleton for `config` under `mode`
pub fn select_skeleton(config: &UnifiedConfiguration, mode: CompositionMode) -> Skeleton {
    if mode == CompositionMode::Combined {
        return Skeleton::Combined;
    }

    PRIMARY_SKELETONS
        .iter()
        .find(|entry| (entry.applies)(config))
        .map(|entry| entry.skeleton)
        .unwrap_or(Skeleton::Standard)
}

/// Side features present in `config` that `skeleton` does not render
pub fn unrendered_features(config: &UnifiedConfiguration, skeleton: Skeleton) -> Vec<&'static str> {
    if skeleton == Skeleton::Combined {
        return Vec::new();
    }

    PRIMARY_SKELETONS
        .iter()
        .filter(|entry| entry.skeleton != skeleton && (entry.applies)(config))
        .filter_map(|entry| entry.skeleton.feature())
        .collect()
}

pub(super) fn render(generator: &AgentCodeGenerator<'_>) -> String {
    match generator.skeleton() {
        Skeleton::Standard => generator.render_standard_program(),
        Skeleton::Analytics => generator.render_analytics_program(),
        Skeleton::Memory => generator.render_memory_program(),
        Skeleton::EventHandling => generator.render_event_handling_program(),
        Skeleton::Combined => generator.render_combined_program(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{EventHandlingConfig, LangfuseConfig, MemoryConfig};

    fn config(langfuse: bool, memory: bool, events: bool) -> UnifiedConfiguration {
        UnifiedConfiguration {
            langfuse_config: langfuse.then(|| LangfuseConfig {
                enabled: true,
                host: "https://cloud.langfuse.com".to_string(),
                project_name: None,
                has_public_key: true,
                has_secret_key: true,
                track_conversations: true,
                track_errors: true,
            }),
            memory_config: memory.then(|| MemoryConfig {
                enabled: true,
                memory_type: "conversation".to_string(),
                user_id: "user".to_string(),
                search_limit: 5,
                has_api_key: true,
            }),
            event_handling_config: events.then(|| EventHandlingConfig {
                enabled: true,
                event_types: Vec::new(),
                log_level: "INFO".to_string(),
                track_analytics: false,
            }),
            ..UnifiedConfiguration::default()
        }
    }

    #[test]
    fn test_precedence() {
        let standard = CompositionMode::Standard;
        assert_eq!(select_skeleton(&config(true, true, true), standard), Skeleton::EventHandling);
        assert_eq!(select_skeleton(&config(true, true, false), standard), Skeleton::Memory);
        assert_eq!(select_skeleton(&config(true, false, false), standard), Skeleton::Analytics);
        assert_eq!(select_skeleton(&config(false, false, false), standard), Skeleton::Standard);
    }

    #[test]
    fn test_combined_mode_is_explicit() {
        assert_eq!(
            select_skeleton(&config(false, false, false), CompositionMode::Combined),
            Skeleton::Combined
        );
    }

    #[test]
    fn test_disabled_feature_does_not_claim_skeleton() {
        let mut config = config(false, true, false);
        if let Some(memory) = config.memory_config.as_mut() {
            memory.enabled = false;
        }
        assert_eq!(select_skeleton(&config, CompositionMode::Standard), Skeleton::Standard);
    }

    #[test]
    fn test_unrendered_features_are_reported() {
        let config = config(true, true, true);
        assert_eq!(
            unrendered_features(&config, Skeleton::EventHandling),
            vec!["memory", "langfuse"]
        );
        assert!(unrendered_features(&config, Skeleton::Combined).is_empty());
    }
}
