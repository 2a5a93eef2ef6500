//! # Configuration Extraction
//!
//! Normalizes an [`AgentGraph`](crate::graph::AgentGraph) into a single
//! [`UnifiedConfiguration`]: the canonical, validated input of the code
//! generator and the verifier.

mod extractor;
mod sanitize;

pub use extractor::*;
pub use sanitize::{python_string, python_triple_quoted, sanitize_identifier};

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const DEFAULT_AGENT_NAME: &str = "adk_agent";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_DESCRIPTION: &str = "An AI agent built with Google ADK.";
pub const DEFAULT_INSTRUCTION: &str =
    "You are a helpful assistant. Answer user questions accurately and concisely.";
pub const DEFAULT_LANGFUSE_HOST: &str = "https://cloud.langfuse.com";

/// A custom tool declared by a tool node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    /// Python identifier of the tool function
    pub name: String,
    pub kind: String,
    pub description: String,
    pub configuration: Map<String, Value>,
}

/// One deduplicated MCP server declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConfig {
    pub enabled: bool,
    pub command: String,
    /// Canonical args. The credential appears as its placeholder variable.
    pub args: Vec<String>,
    /// Names of environment variables passed to the server. Values are never rendered.
    pub env_vars: BTreeMap<String, String>,
    pub package_ref: String,
    /// Environment variable holding the server credential
    pub api_key_ref: Option<String>,
    pub profile_id: Option<String>,
    pub available_functions: Vec<String>,
}

impl McpConfig {
    /// Deduplication key: `packageRef|command`
    pub fn dedup_key(&self) -> String {
        format!("{}|{}", self.package_ref, self.command)
    }

    /// Environment variable that holds this server's credential
    pub fn credential_env(&self) -> &str {
        self.api_key_ref
            .as_deref()
            .unwrap_or(crate::mcp::DEFAULT_CREDENTIAL_ENV)
    }

    /// Python variable used as the auth flag value
    pub fn credential_variable(&self) -> String {
        crate::mcp::credential_variable(self.credential_env())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LangfuseConfig {
    pub enabled: bool,
    pub host: String,
    pub project_name: Option<String>,
    pub has_public_key: bool,
    pub has_secret_key: bool,
    pub track_conversations: bool,
    pub track_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    pub enabled: bool,
    pub memory_type: String,
    pub user_id: String,
    pub search_limit: u32,
    pub has_api_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHandlingConfig {
    pub enabled: bool,
    /// Event types that get a logging listener; empty means all
    pub event_types: Vec<String>,
    pub log_level: String,
    pub track_analytics: bool,
}

/// Complexity classification used for generation hints and quality scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn from_score(score: u32) -> Self {
        match score {
            0 | 1 => Complexity::Simple,
            2 | 3 => Complexity::Medium,
            _ => Complexity::Complex,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

/// Canonical, validated aggregate of an agent graph
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedConfiguration {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub agent_name: String,
    pub agent_description: String,
    pub agent_instruction: String,
    pub agent_model: String,
    pub tools: Vec<ToolConfig>,
    pub mcp_configs: Vec<McpConfig>,
    pub langfuse_config: Option<LangfuseConfig>,
    pub memory_config: Option<MemoryConfig>,
    pub event_handling_config: Option<EventHandlingConfig>,
    pub node_count: usize,
    pub edge_count: usize,
    pub features: Vec<String>,
    pub complexity: Complexity,
}

impl Default for UnifiedConfiguration {
    /// Baseline built from the fixed defaults
    fn default() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            agent_description: DEFAULT_DESCRIPTION.to_string(),
            agent_instruction: DEFAULT_INSTRUCTION.to_string(),
            agent_model: DEFAULT_MODEL.to_string(),
            tools: Vec::new(),
            mcp_configs: Vec::new(),
            langfuse_config: None,
            memory_config: None,
            event_handling_config: None,
            node_count: 0,
            edge_count: 0,
            features: Vec::new(),
            complexity: Complexity::Simple,
        }
    }
}

impl UnifiedConfiguration {
    pub fn langfuse(&self) -> Option<&LangfuseConfig> {
        self.langfuse_config.as_ref().filter(|c| c.enabled)
    }

    pub fn memory(&self) -> Option<&MemoryConfig> {
        self.memory_config.as_ref().filter(|c| c.enabled)
    }

    pub fn event_handling(&self) -> Option<&EventHandlingConfig> {
        self.event_handling_config.as_ref().filter(|c| c.enabled)
    }

    pub fn enabled_mcp(&self) -> impl Iterator<Item = &McpConfig> {
        self.mcp_configs.iter().filter(|c| c.enabled)
    }

    pub fn has_mcp(&self) -> bool {
        self.enabled_mcp().next().is_some()
    }

    /// Number of enabled side features (langfuse, memory, event handling)
    pub fn side_feature_count(&self) -> usize {
        [
            self.langfuse().is_some(),
            self.memory().is_some(),
            self.event_handling().is_some(),
        ]
        .into_iter()
        .filter(|enabled| *enabled)
        .count()
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}
