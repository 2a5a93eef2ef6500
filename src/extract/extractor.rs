//! # Configuration Extractor
//!
//! `graph -> UnifiedConfiguration`. Total: every input, including an empty
//! graph, yields a structurally valid configuration. Problems are reported in
//! `errors` (validity) or `warnings` (advice), never by panicking.

use super::sanitize::sanitize_identifier;
use super::*;
use crate::graph::{AgentGraph, Edge, Node, NodeKind};
use crate::mcp;
use std::collections::HashSet;

/// Event types the event-handling skeleton knows how to emit
pub const KNOWN_EVENT_TYPES: &[&str] = &[
    "session_start",
    "user_message",
    "agent_response",
    "tool_call",
    "error",
    "session_end",
];

const MIN_AGENT_NAME_LEN: usize = 2;
const MIN_INSTRUCTION_LEN: usize = 10;

/// Python names the generated module defines itself
const RESERVED_NAMES: &[&str] = &[
    "root_agent",
    "runner",
    "session_service",
    "main",
    "google_search",
    "os",
    "asyncio",
    "types",
    "logging",
    "logger",
    "time",
    "load_dotenv",
    "smithery_api_key",
    "langfuse",
    "track_conversation",
    "memory_client",
    "search_memory",
    "store_memory",
    "event_handler",
    "event_counts",
    "log_event",
    "record_analytics",
    "on_session_start",
    "on_message",
    "on_response",
    "on_error",
    "on_session_end",
];

/// Extract the configuration of a whole graph snapshot
pub fn extract_graph(graph: &AgentGraph) -> UnifiedConfiguration {
    extract(&graph.nodes, &graph.edges)
}

/// Normalize and validate `nodes`/`edges` into a [`UnifiedConfiguration`]
pub fn extract(nodes: &[Node], edges: &[Edge]) -> UnifiedConfiguration {
    tracing::info!(
        "[EXTRACT] Extracting configuration ({} nodes, {} edges)",
        nodes.len(),
        edges.len()
    );

    let mut config = UnifiedConfiguration {
        node_count: nodes.len(),
        edge_count: edges.len(),
        ..UnifiedConfiguration::default()
    };

    let node_ids: HashSet<&str> = nodes.iter().map(|node| node.id.as_str()).collect();
    let live_edges: Vec<&Edge> = edges
        .iter()
        .filter(|edge| {
            node_ids.contains(edge.source_id.as_str()) && node_ids.contains(edge.target_id.as_str())
        })
        .collect();
    let dangling = edges.len() - live_edges.len();
    if dangling > 0 {
        tracing::debug!("[EXTRACT] Ignoring {} dangling edges", dangling);
        config.warnings.push(format!(
            "{} edge(s) reference missing nodes and were ignored",
            dangling
        ));
    }

    let agents: Vec<&Node> = nodes.iter().filter(|n| n.kind == NodeKind::Agent).collect();
    let agent = agents.first().copied();
    match agent {
        Some(agent) => resolve_agent(agent, &mut config),
        None => config
            .errors
            .push("Missing agent node: add an agent node to the graph".to_string()),
    }
    if agents.len() > 1 {
        config.warnings.push(format!(
            "{} agent nodes found; only '{}' is used",
            agents.len(),
            agents[0].label
        ));
    }

    config.agent_model = resolve_model(nodes, agent);
    config.tools = extract_tools(nodes);
    config.mcp_configs = extract_mcp_configs(nodes, &mut config.warnings);
    config.langfuse_config = first_enabled(
        nodes,
        NodeKind::Langfuse,
        &["langfuseEnabled", "enabled"],
        "Langfuse",
        &mut config.warnings,
    )
    .map(langfuse_config);
    config.memory_config = first_enabled(
        nodes,
        NodeKind::Memory,
        &["memoryEnabled", "enabled"],
        "memory",
        &mut config.warnings,
    )
    .map(memory_config);
    config.event_handling_config = first_enabled(
        nodes,
        NodeKind::EventHandling,
        &["eventHandlingEnabled", "enabled"],
        "event handling",
        &mut config.warnings,
    )
    .map(|node| event_handling_config(node, &mut config.warnings));

    check_feature_integrity(&mut config);
    if let Some(agent) = agent {
        check_connectivity(agent, nodes, &live_edges, &mut config.warnings);
    }

    config.features = features(&config);
    config.complexity = Complexity::from_score(complexity_score(&config, nodes));
    config.is_valid = config.errors.is_empty();

    tracing::info!(
        "[EXTRACT] Agent '{}': {} tools, {} MCP servers, features [{}], complexity {}",
        config.agent_name,
        config.tools.len(),
        config.mcp_configs.len(),
        config.features.join(", "),
        config.complexity.as_str()
    );
    if !config.is_valid {
        tracing::warn!("[EXTRACT] Configuration invalid: {}", config.errors.join("; "));
    }

    config
}

fn resolve_agent(agent: &Node, config: &mut UnifiedConfiguration) {
    let raw_name = if agent.label.trim().is_empty() {
        agent.attr_str(&["name", "agentName"]).unwrap_or("")
    } else {
        agent.label.as_str()
    };

    match sanitize_identifier(raw_name) {
        Some(name) => {
            if name.len() < MIN_AGENT_NAME_LEN {
                config.errors.push(format!(
                    "Agent name '{}' must be at least {} characters",
                    name, MIN_AGENT_NAME_LEN
                ));
            }
            config.agent_name = name;
        }
        None => config.warnings.push(format!(
            "Agent node has no usable name; using '{}'",
            DEFAULT_AGENT_NAME
        )),
    }

    let description = if agent.description.trim().is_empty() {
        agent.attr_str(&["description"])
    } else {
        Some(agent.description.trim())
    };
    if let Some(description) = description {
        config.agent_description = description.to_string();
    }

    if let Some(instruction) = agent.attr_str(&["instruction", "systemPrompt", "prompt"]) {
        if instruction.chars().count() < MIN_INSTRUCTION_LEN {
            config.errors.push(format!(
                "Agent instruction must be at least {} characters",
                MIN_INSTRUCTION_LEN
            ));
        }
        config.agent_instruction = instruction.to_string();
    }
}

/// Model node field, then agent field, then the fixed default
fn resolve_model(nodes: &[Node], agent: Option<&Node>) -> String {
    const MODEL_KEYS: &[&str] = &["modelType", "model", "modelName"];

    nodes
        .iter()
        .filter(|node| node.kind == NodeKind::Model)
        .find_map(|node| node.attr_str(MODEL_KEYS))
        .or_else(|| agent.and_then(|agent| agent.attr_str(MODEL_KEYS)))
        .unwrap_or(DEFAULT_MODEL)
        .to_string()
}

fn extract_tools(nodes: &[Node]) -> Vec<ToolConfig> {
    let mut taken: HashSet<String> = RESERVED_NAMES.iter().map(|s| s.to_string()).collect();
    let mut tools = Vec::new();

    for (index, node) in nodes.iter().filter(|n| n.kind == NodeKind::Tool).enumerate() {
        let base = sanitize_identifier(&node.label)
            .or_else(|| node.attr_str(&["name"]).and_then(sanitize_identifier))
            .unwrap_or_else(|| format!("tool_{}", index + 1));
        let name = unique_name(&base, &mut taken);

        let description = if node.description.trim().is_empty() {
            node.attr_str(&["description"])
                .map(String::from)
                .unwrap_or_else(|| format!("Custom tool {}", name))
        } else {
            node.description.trim().to_string()
        };

        tracing::debug!("[EXTRACT] Tool node {} -> {}", node.id, name);
        tools.push(ToolConfig {
            name,
            kind: node
                .attr_str(&["toolType", "type"])
                .unwrap_or("function")
                .to_ascii_lowercase(),
            description,
            configuration: node.attributes.clone(),
        });
    }

    tools
}

fn unique_name(base: &str, taken: &mut HashSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut suffix = 2;
    while taken.contains(&candidate) {
        candidate = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    taken.insert(candidate.clone());
    candidate
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn extract_mcp_configs(nodes: &[Node], warnings: &mut Vec<String>) -> Vec<McpConfig> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut configs = Vec::new();

    for node in nodes.iter().filter(|n| n.kind.is_mcp()) {
        let display = if node.label.is_empty() { node.id.as_str() } else { node.label.as_str() };

        if node.attr_bool(&["mcpEnabled", "enabled"]) == Some(false) {
            tracing::debug!("[EXTRACT] Skipping disabled MCP node {}", node.id);
            continue;
        }

        let supplied = node.attr_args(&["args", "mcpArgs"]).map(|(args, degraded)| {
            if degraded {
                warnings.push(format!(
                    "MCP node '{}' has unbalanced quotes in its args; split on whitespace",
                    display
                ));
            }
            args
        });

        let package = node
            .attr_str(&["smitheryPackage", "mcpPackage", "packageName", "package"])
            .map(String::from)
            .or_else(|| supplied.as_deref().and_then(mcp::package_from_args));
        let Some(package) = package else {
            tracing::warn!("[EXTRACT] MCP node {} has no package reference", node.id);
            warnings.push(format!(
                "MCP node '{}' has no package reference and was dropped",
                display
            ));
            continue;
        };

        let api_key_ref = match node.attr_str(&["apiKeyRef", "apiKeyEnv", "smitheryApiKeyRef"]) {
            Some(name) if is_env_name(name) => Some(name.to_string()),
            Some(name) => {
                warnings.push(format!(
                    "MCP node '{}' names an invalid credential variable '{}'; using {}",
                    display,
                    name,
                    mcp::DEFAULT_CREDENTIAL_ENV
                ));
                None
            }
            None => None,
        };
        if node.attr_str(&["smitheryApiKey", "apiKey"]).is_some() {
            warnings.push(format!(
                "MCP node '{}' carries an inline API key; it is ignored, set {} in the environment",
                display,
                api_key_ref.as_deref().unwrap_or(mcp::DEFAULT_CREDENTIAL_ENV)
            ));
        }

        let profile_id = node
            .attr_str(&["profileId", "profile"])
            .map(String::from)
            .or_else(|| supplied.as_deref().and_then(mcp::profile_from_args));

        let command = node.attr_str(&["command"]).unwrap_or(mcp::DEFAULT_COMMAND).to_string();
        let base_args = supplied.unwrap_or_else(|| mcp::synthesize_args(&package));
        let credential =
            mcp::credential_variable(api_key_ref.as_deref().unwrap_or(mcp::DEFAULT_CREDENTIAL_ENV));
        let args = mcp::canonicalize_args(&base_args, &package, &credential, profile_id.as_deref());

        let config = McpConfig {
            enabled: true,
            command,
            args,
            env_vars: node
                .attr_map(&["envVars", "env"])
                .into_iter()
                .filter(|(name, _)| is_env_name(name))
                .collect(),
            package_ref: package,
            api_key_ref,
            profile_id,
            available_functions: node
                .attr_list(&["availableFunctions", "functions"])
                .unwrap_or_default(),
        };

        if !seen.insert(config.dedup_key()) {
            tracing::debug!("[EXTRACT] Dropping duplicate MCP declaration {}", config.dedup_key());
            warnings.push(format!(
                "Duplicate MCP declaration for {} ({}) ignored",
                config.package_ref, config.command
            ));
            continue;
        }

        configs.push(config);
    }

    configs
}

/// First enabled node of `kind`; extra enabled nodes are reported, not merged
fn first_enabled<'a>(
    nodes: &'a [Node],
    kind: NodeKind,
    flag_keys: &[&str],
    feature: &str,
    warnings: &mut Vec<String>,
) -> Option<&'a Node> {
    let enabled: Vec<&Node> = nodes
        .iter()
        .filter(|node| node.kind == kind && node.attr_bool(flag_keys).unwrap_or(true))
        .collect();

    if enabled.len() > 1 {
        warnings.push(format!(
            "{} enabled {} nodes found; only the first is used",
            enabled.len(),
            feature
        ));
    }
    enabled.first().copied()
}

fn langfuse_config(node: &Node) -> LangfuseConfig {
    LangfuseConfig {
        enabled: true,
        host: node
            .attr_str(&["host", "langfuseHost"])
            .unwrap_or(DEFAULT_LANGFUSE_HOST)
            .to_string(),
        project_name: node.attr_str(&["projectName", "project"]).map(String::from),
        has_public_key: node.attr_str(&["publicKey", "langfusePublicKey"]).is_some(),
        has_secret_key: node.attr_str(&["secretKey", "langfuseSecretKey"]).is_some(),
        track_conversations: node.attr_bool(&["trackConversations"]).unwrap_or(true),
        track_errors: node.attr_bool(&["trackErrors"]).unwrap_or(true),
    }
}

fn memory_config(node: &Node) -> MemoryConfig {
    MemoryConfig {
        enabled: true,
        memory_type: node
            .attr_str(&["memoryType", "type"])
            .unwrap_or("conversation")
            .to_ascii_lowercase(),
        user_id: node.attr_str(&["userId"]).unwrap_or("user").to_string(),
        search_limit: node
            .attr_u32(&["searchLimit", "maxResults"])
            .unwrap_or(5)
            .clamp(1, 50),
        has_api_key: node.attr_str(&["apiKey", "mem0ApiKey"]).is_some(),
    }
}

fn event_handling_config(node: &Node, warnings: &mut Vec<String>) -> EventHandlingConfig {
    let mut event_types = Vec::new();
    for raw in node.attr_list(&["eventTypes", "events"]).unwrap_or_default() {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        if KNOWN_EVENT_TYPES.contains(&normalized.as_str()) {
            if !event_types.contains(&normalized) {
                event_types.push(normalized);
            }
        } else {
            warnings.push(format!("Unknown event type '{}' ignored", raw));
        }
    }

    let log_level = node
        .attr_str(&["logLevel"])
        .map(str::to_ascii_uppercase)
        .filter(|level| matches!(level.as_str(), "DEBUG" | "INFO" | "WARNING" | "ERROR"))
        .unwrap_or_else(|| "INFO".to_string());

    EventHandlingConfig {
        enabled: true,
        event_types,
        log_level,
        track_analytics: node
            .attr_bool(&["analyticsEnabled", "trackAnalytics"])
            .unwrap_or(false),
    }
}

fn check_feature_integrity(config: &mut UnifiedConfiguration) {
    if let Some(langfuse) = config.langfuse() {
        if !(langfuse.has_public_key && langfuse.has_secret_key) {
            config.warnings.push(
                "Langfuse is enabled but its credentials are incomplete; \
                 set LANGFUSE_PUBLIC_KEY and LANGFUSE_SECRET_KEY in the environment"
                    .to_string(),
            );
        }
    }

    if let Some(memory) = config.memory() {
        if !memory.has_api_key {
            config.warnings.push(
                "Memory is enabled without an API key; set MEM0_API_KEY or the agent \
                 falls back to in-process memory"
                    .to_string(),
            );
        }
    }

    let event_analytics = config.event_handling().is_some_and(|e| e.track_analytics);
    if config.langfuse().is_some() && event_analytics {
        config.warnings.push(
            "Langfuse and event-handling analytics are both enabled; \
             interactions may be tracked twice"
                .to_string(),
        );
    }
}

fn check_connectivity(agent: &Node, nodes: &[Node], edges: &[&Edge], warnings: &mut Vec<String>) {
    let connected: HashSet<&str> = edges
        .iter()
        .filter_map(|edge| {
            if edge.source_id == agent.id {
                Some(edge.target_id.as_str())
            } else if edge.target_id == agent.id {
                Some(edge.source_id.as_str())
            } else {
                None
            }
        })
        .collect();

    for node in nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Tool || n.kind.is_mcp())
        .filter(|n| !connected.contains(n.id.as_str()))
    {
        let display = if node.label.is_empty() { node.id.as_str() } else { node.label.as_str() };
        warnings.push(format!("Node '{}' is not connected to the agent", display));
    }
}

fn features(config: &UnifiedConfiguration) -> Vec<String> {
    let mut features = Vec::new();
    if config.has_mcp() {
        features.push("mcp".to_string());
    }
    if config.langfuse().is_some() {
        features.push("langfuse".to_string());
    }
    if config.memory().is_some() {
        features.push("memory".to_string());
    }
    if config.event_handling().is_some() {
        features.push("event_handling".to_string());
    }
    if !config.tools.is_empty() {
        features.push("custom_tools".to_string());
    }
    features
}

fn complexity_score(config: &UnifiedConfiguration, nodes: &[Node]) -> u32 {
    let mut score = 0;
    if config.node_count > 5 {
        score += 1;
    }
    if config.node_count > 10 {
        score += 1;
    }
    score += config.side_feature_count() as u32;
    if config.mcp_configs.len() > 2 {
        score += 1;
    }
    if nodes.iter().filter(|n| n.kind == NodeKind::Tool).count() > 3 {
        score += 1;
    }
    score
}
