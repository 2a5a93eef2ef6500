//! # Agent Graph Model
//!
//! The node-and-edge description produced by the visual editor. The compiler
//! treats it as an immutable snapshot: nothing in this crate mutates a graph.
//!
//! Attribute readers are deliberately forgiving. The editor stores values as
//! loosely-typed JSON, so lists may arrive as strings, flags as `"true"`, and
//! maps as `KEY=VALUE` lines.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Node kind discriminant as written by the editor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    #[serde(rename = "agent")]
    Agent,
    #[serde(rename = "model")]
    Model,
    #[serde(rename = "tool")]
    Tool,
    #[serde(rename = "mcp-client")]
    McpClient,
    #[serde(rename = "mcp-server")]
    McpServer,
    #[serde(rename = "mcp-tool")]
    McpTool,
    #[serde(rename = "langfuse")]
    Langfuse,
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "event-handling")]
    EventHandling,
    #[serde(rename = "input")]
    Input,
    #[serde(rename = "output")]
    Output,
    #[serde(other)]
    Unknown,
}

impl NodeKind {
    /// Any of the MCP flavours (client, server, tool)
    pub fn is_mcp(self) -> bool {
        matches!(self, NodeKind::McpClient | NodeKind::McpServer | NodeKind::McpTool)
    }
}

/// A single node of the agent graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Adjacency between two nodes. Endpoints are not guaranteed to exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "source")]
    pub source_id: String,
    #[serde(alias = "target")]
    pub target_id: String,
}

/// Snapshot of the editor graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl AgentGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Parse the editor's JSON export
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            description: String::new(),
            attributes: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_attr(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// First non-empty string attribute among `keys`
    pub fn attr_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.attributes.get(*key))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    /// First boolean-like attribute among `keys`
    pub fn attr_bool(&self, keys: &[&str]) -> Option<bool> {
        keys.iter()
            .filter_map(|key| self.attributes.get(*key))
            .find_map(|value| match value {
                Value::Bool(b) => Some(*b),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => Some(true),
                    "false" | "no" | "off" | "0" => Some(false),
                    _ => None,
                },
                Value::Number(n) => n.as_i64().map(|n| n != 0),
                _ => None,
            })
    }

    pub fn attr_u32(&self, keys: &[&str]) -> Option<u32> {
        keys.iter()
            .filter_map(|key| self.attributes.get(*key))
            .find_map(|value| match value {
                Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
    }

    /// List attribute. Strings are split on newlines and commas.
    pub fn attr_list(&self, keys: &[&str]) -> Option<Vec<String>> {
        keys.iter()
            .filter_map(|key| self.attributes.get(*key))
            .find_map(|value| match value {
                Value::Array(items) => Some(
                    items
                        .iter()
                        .filter_map(value_to_string)
                        .filter(|item| !item.is_empty())
                        .collect(),
                ),
                Value::String(s) if !s.trim().is_empty() => Some(
                    s.split(|c| c == '\n' || c == ',')
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(String::from)
                        .collect(),
                ),
                _ => None,
            })
    }

    /// Command-line style attribute. Strings are split with shell quoting rules.
    ///
    /// Returns the tokens and whether the shell split had to be abandoned for a
    /// plain whitespace split (unbalanced quotes).
    pub fn attr_args(&self, keys: &[&str]) -> Option<(Vec<String>, bool)> {
        keys.iter()
            .filter_map(|key| self.attributes.get(*key))
            .find_map(|value| match value {
                Value::Array(items) => Some((
                    items
                        .iter()
                        .filter_map(value_to_string)
                        .filter(|item| !item.is_empty())
                        .collect(),
                    false,
                )),
                Value::String(s) if !s.trim().is_empty() => Some(match shell_words::split(s) {
                    Ok(tokens) => (tokens, false),
                    Err(_) => (s.split_whitespace().map(String::from).collect(), true),
                }),
                _ => None,
            })
    }

    /// Map attribute. Accepts an object or `KEY=VALUE` lines.
    pub fn attr_map(&self, keys: &[&str]) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let value = keys.iter().find_map(|key| self.attributes.get(*key));

        match value {
            Some(Value::Object(entries)) => {
                for (key, value) in entries {
                    if let Some(value) = value_to_string(value) {
                        map.insert(key.trim().to_string(), value);
                    }
                }
            }
            Some(Value::String(s)) => {
                for line in s.lines() {
                    if let Some((key, value)) = line.split_once('=') {
                        let key = key.trim();
                        if !key.is_empty() {
                            map.insert(key.to_string(), value.trim().to_string());
                        }
                    }
                }
            }
            _ => {}
        }

        map.retain(|key, _| !key.is_empty());
        map
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_editor_graph() {
        let json = r#"{
            "nodes": [
                {"id": "a1", "kind": "agent", "label": "Helper", "attributes": {"instruction": "Be helpful to everyone"}},
                {"id": "m1", "kind": "mcp-client", "attributes": {"smitheryPackage": "@yokingma/time-mcp"}},
                {"id": "x1", "kind": "sticky-note"}
            ],
            "edges": [{"id": "e1", "source": "m1", "target": "a1"}]
        }"#;

        let graph = AgentGraph::from_json(json).unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.nodes[1].kind, NodeKind::McpClient);
        assert_eq!(graph.nodes[2].kind, NodeKind::Unknown);
        assert_eq!(graph.edges[0].source_id, "m1");
        assert_eq!(graph.edges[0].target_id, "a1");
    }

    #[test]
    fn test_attr_args_splits_shell_strings() {
        let node = Node::new("n", NodeKind::McpClient, "")
            .with_attr("args", json!("-y @smithery/cli run \"@scope/pkg name\""));
        let (args, degraded) = node.attr_args(&["args"]).unwrap();
        assert_eq!(args, vec!["-y", "@smithery/cli", "run", "@scope/pkg name"]);
        assert!(!degraded);

        let broken = Node::new("n", NodeKind::McpClient, "").with_attr("args", json!("run \"@scope/pkg"));
        let (args, degraded) = broken.attr_args(&["args"]).unwrap();
        assert_eq!(args, vec!["run", "\"@scope/pkg"]);
        assert!(degraded);
    }

    #[test]
    fn test_attr_map_accepts_lines() {
        let node = Node::new("n", NodeKind::McpClient, "")
            .with_attr("envVars", json!("GITHUB_TOKEN=abc\n\n=ignored\nREGION = eu"));
        let map = node.attr_map(&["envVars"]);
        assert_eq!(map.len(), 2);
        assert_eq!(map["REGION"], "eu");
    }

    #[test]
    fn test_attr_bool_accepts_strings() {
        let node = Node::new("n", NodeKind::Memory, "")
            .with_attr("memoryEnabled", json!("false"))
            .with_attr("enabled", json!(true));
        assert_eq!(node.attr_bool(&["memoryEnabled", "enabled"]), Some(false));
        assert_eq!(node.attr_bool(&["missing"]), None);
    }
}
