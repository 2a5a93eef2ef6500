//! # Node-Specific Handlers
//!
//! Rendering for the nodes that contribute to the agent's tool list: MCP
//! servers become toolset construction blocks, tool nodes become function
//! tools.

use crate::extract::{python_string, python_triple_quoted, sanitize_identifier, McpConfig, ToolConfig, UnifiedConfiguration};
use std::collections::{BTreeSet, HashSet};

/// Passed to every MCP server unless the node overrides it
const DEFAULT_NODE_OPTIONS: &str = "--no-warnings --experimental-fetch";

/// Tool kinds that map onto the built-in search tool
const SEARCH_KINDS: &[&str] = &["search", "google_search", "web_search"];

/// A rendered MCP toolset and the identifier it is bound to
#[derive(Debug, Clone, PartialEq)]
pub struct ToolsetBlock {
    pub identifier: String,
    pub package_ref: String,
    pub code: String,
}

/// Python identifier for the toolset of `package`, e.g.
/// `@kazuph/mcp-taskmanager` -> `mcp_taskmanager_toolset`
pub fn toolset_identifier(package: &str) -> String {
    let last = package
        .trim_start_matches('@')
        .rsplit('/')
        .next()
        .unwrap_or(package);
    let without_version = last.split('@').next().unwrap_or(last);
    let base = sanitize_identifier(without_version).unwrap_or_else(|| "mcp".to_string());

    if base.ends_with("toolset") {
        base
    } else {
        format!("{}_toolset", base)
    }
}

/// Python list literal for MCP args; credential placeholders stay bare names
pub fn render_args_list(args: &[String], credential_vars: &HashSet<String>) -> String {
    let items: Vec<String> = args
        .iter()
        .map(|arg| {
            if credential_vars.contains(arg) {
                arg.clone()
            } else {
                python_string(arg)
            }
        })
        .collect();
    format!("[{}]", items.join(", "))
}

/// Credential variables referenced by the enabled MCP configs, with their env names
pub fn credential_bindings(config: &UnifiedConfiguration) -> Vec<(String, String)> {
    let mut seen = BTreeSet::new();
    config
        .enabled_mcp()
        .filter(|mcp| seen.insert(mcp.credential_env().to_string()))
        .map(|mcp| (mcp.credential_variable(), mcp.credential_env().to_string()))
        .collect()
}

/// One toolset block per deduplicated MCP config, identifiers made unique
pub fn build_toolsets(config: &UnifiedConfiguration) -> Vec<ToolsetBlock> {
    let mut taken: HashSet<String> = config.tools.iter().map(|t| t.name.clone()).collect();
    let credential_vars: HashSet<String> = credential_bindings(config)
        .into_iter()
        .map(|(var, _)| var)
        .collect();

    config
        .enabled_mcp()
        .map(|mcp| {
            let base = toolset_identifier(&mcp.package_ref);
            let mut identifier = base.clone();
            let mut suffix = 2;
            while !taken.insert(identifier.clone()) {
                identifier = format!("{}_{}", base, suffix);
                suffix += 1;
            }

            tracing::debug!("[CODEGEN] Toolset {} for {}", identifier, mcp.package_ref);
            ToolsetBlock {
                code: render_toolset(&identifier, mcp, &credential_vars),
                identifier,
                package_ref: mcp.package_ref.clone(),
            }
        })
        .collect()
}

fn render_toolset(identifier: &str, mcp: &McpConfig, credential_vars: &HashSet<String>) -> String {
    let mut env_entries = Vec::new();
    if !mcp.env_vars.contains_key("NODE_OPTIONS") {
        env_entries.push(format!(
            "{}: {}",
            python_string("NODE_OPTIONS"),
            python_string(DEFAULT_NODE_OPTIONS)
        ));
    }
    env_entries.push(format!(
        "{}: {}",
        python_string(mcp.credential_env()),
        mcp.credential_variable()
    ));
    for name in mcp.env_vars.keys().filter(|name| name.as_str() != mcp.credential_env()) {
        env_entries.push(format!(
            "{}: os.getenv({}, \"\")",
            python_string(name),
            python_string(name)
        ));
    }

    let mut code = String::new();
    code.push_str(&format!("# MCP toolset for {}\n", mcp.package_ref.replace('\n', " ")));
    code.push_str(&format!("{} = MCPToolset(\n", identifier));
    code.push_str("    connection_params=StdioConnectionParams(\n");
    code.push_str("        server_params=StdioServerParameters(\n");
    code.push_str(&format!("            command={},\n", python_string(&mcp.command)));
    code.push_str(&format!(
        "            args={},\n",
        render_args_list(&mcp.args, credential_vars)
    ));
    code.push_str(&format!("            env={{{}}}\n", env_entries.join(", ")));
    code.push_str("        )\n");
    code.push_str("    )\n");
    code.push_str(")\n");
    code
}

pub fn is_search_tool(tool: &ToolConfig) -> bool {
    SEARCH_KINDS.contains(&tool.kind.as_str())
}

/// Function tool stub for a custom tool node
pub fn render_tool_function(tool: &ToolConfig) -> String {
    let mut code = String::new();
    code.push_str(&format!("def {}(query: str) -> dict:\n", tool.name));
    code.push_str(&format!(
        "    {}\n",
        python_triple_quoted(&format!(
            "{}\n\n    Args:\n        query: The user query\n\n    Returns:\n        dict: The result\n    ",
            tool.description.replace('\n', " ")
        ))
    ));
    code.push_str(&format!(
        "    return {{\"status\": \"success\", \"tool\": {}, \"result\": f\"Results for {{query}}\"}}\n",
        python_string(&tool.name)
    ));
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{extract, UnifiedConfiguration};
    use crate::graph::{Node, NodeKind};
    use serde_json::json;

    #[test]
    fn test_toolset_identifier() {
        assert_eq!(toolset_identifier("@kazuph/mcp-taskmanager"), "mcp_taskmanager_toolset");
        assert_eq!(toolset_identifier("@yokingma/time-mcp@1.2.0"), "time_mcp_toolset");
        assert_eq!(toolset_identifier("weather-toolset"), "weather_toolset");
        assert_eq!(toolset_identifier("@@@"), "mcp_toolset");
    }

    #[test]
    fn test_colliding_identifiers_get_suffixes() {
        let nodes = vec![
            Node::new("a", NodeKind::Agent, "bot"),
            Node::new("m1", NodeKind::McpClient, "").with_attr("smitheryPackage", json!("@one/time")),
            Node::new("m2", NodeKind::McpClient, "").with_attr("smitheryPackage", json!("@two/time")),
        ];
        let config = extract(&nodes, &[]);
        let ids: Vec<_> = build_toolsets(&config).into_iter().map(|t| t.identifier).collect();
        assert_eq!(ids, vec!["time_toolset", "time_toolset_2"]);
    }

    #[test]
    fn test_toolset_block_never_inlines_env_values() {
        let nodes = vec![
            Node::new("a", NodeKind::Agent, "bot"),
            Node::new("m1", NodeKind::McpClient, "")
                .with_attr("smitheryPackage", json!("@acme/github"))
                .with_attr("envVars", json!({"GITHUB_TOKEN": "ghp_secret"})),
        ];
        let config = extract(&nodes, &[]);
        let block = &build_toolsets(&config)[0];
        assert!(block.code.contains("\"GITHUB_TOKEN\": os.getenv(\"GITHUB_TOKEN\", \"\")"));
        assert!(block.code.contains("\"--key\", smithery_api_key]"));
        assert!(!block.code.contains("ghp_secret"));
    }

    #[test]
    fn test_no_credentials_without_mcp() {
        assert!(credential_bindings(&UnifiedConfiguration::default()).is_empty());
    }
}
