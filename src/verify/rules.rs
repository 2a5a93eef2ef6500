//! # Defect Rule Registry
//!
//! Ordered list of known-bad code shapes. Each rule pairs a detector with an
//! explicit fix: a local [`Fix::Patch`] or a full [`Fix::Resynthesize`] from
//! the configuration. Rules run once each, in [`RULES`] order, every rule
//! seeing the code produced by the rules before it.
//!
//! Every patch removes the condition its detector looks for and introduces
//! nothing an earlier rule detects, so a second pass over fixed code is quiet.

use super::pysrc::{self, cached, is_identifier, Call, Source};
use crate::codegen::{render_args_list, render_canonical_agent};
use crate::extract::{python_string, python_triple_quoted, sanitize_identifier, McpConfig, UnifiedConfiguration};
use crate::mcp;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStrategy {
    Patch,
    Resynthesize,
}

pub type Detector = fn(&str, &UnifiedConfiguration) -> bool;
pub type Patcher = fn(&str, &UnifiedConfiguration) -> String;

pub enum Fix {
    /// Targeted text substitution
    Patch(Patcher),
    /// Discard the code and render the canonical agent
    Resynthesize,
}

pub struct Rule {
    pub id: &'static str,
    pub description: &'static str,
    pub severity: Severity,
    pub detect: Detector,
    pub fix: Fix,
}

impl Rule {
    pub fn strategy(&self) -> FixStrategy {
        match self.fix {
            Fix::Patch(_) => FixStrategy::Patch,
            Fix::Resynthesize => FixStrategy::Resynthesize,
        }
    }

    pub fn apply(&self, code: &str, config: &UnifiedConfiguration) -> String {
        match self.fix {
            Fix::Patch(patch) => patch(code, config),
            Fix::Resynthesize => render_canonical_agent(config),
        }
    }
}

pub const RULES: &[Rule] = &[
    Rule {
        id: "nonexistent_base_class",
        description: "Code references agent classes that google.adk does not provide",
        severity: Severity::Error,
        detect: detect_nonexistent_base_class,
        fix: Fix::Resynthesize,
    },
    Rule {
        id: "nonexistent_helper_import",
        description: "Code imports google.adk modules or MCP helpers that do not exist",
        severity: Severity::Error,
        detect: detect_nonexistent_helper_import,
        fix: Fix::Resynthesize,
    },
    Rule {
        id: "agent_subclass",
        description: "Agent implemented as a hand-written subclass instead of an LlmAgent instance",
        severity: Severity::Error,
        detect: detect_agent_subclass,
        fix: Fix::Resynthesize,
    },
    Rule {
        id: "hardcoded_secret",
        description: "Secret value written into the code; replaced with an environment lookup",
        severity: Severity::Error,
        detect: detect_hardcoded_secret,
        fix: Fix::Patch(fix_hardcoded_secret),
    },
    Rule {
        id: "invalid_identifier",
        description: "Hyphenated names are not valid Python identifiers",
        severity: Severity::Error,
        detect: detect_invalid_identifier,
        fix: Fix::Patch(fix_invalid_identifier),
    },
    Rule {
        id: "misspelled_constructor_field",
        description: "Constructor called with a misspelled keyword argument",
        severity: Severity::Error,
        detect: detect_misspelled_field,
        fix: Fix::Patch(fix_misspelled_field),
    },
    Rule {
        id: "bare_tools_value",
        description: "Agent tools must be a list",
        severity: Severity::Error,
        detect: detect_bare_tools,
        fix: Fix::Patch(fix_bare_tools),
    },
    Rule {
        id: "duplicate_toolset_definition",
        description: "The same MCP server is wired into the agent more than once",
        severity: Severity::Warning,
        detect: detect_duplicate_toolsets,
        fix: Fix::Patch(fix_duplicate_toolsets),
    },
    Rule {
        id: "stale_mcp_args",
        description: "MCP server args do not match the configured package, credential or profile",
        severity: Severity::Error,
        detect: detect_stale_mcp_args,
        fix: Fix::Patch(fix_stale_mcp_args),
    },
    Rule {
        id: "missing_api_key_guard",
        description: "Credential variable used without loading and checking it",
        severity: Severity::Warning,
        detect: detect_missing_key_guard,
        fix: Fix::Patch(fix_missing_key_guard),
    },
    Rule {
        id: "missing_root_agent",
        description: "No agent is bound to root_agent",
        severity: Severity::Error,
        detect: detect_missing_root_agent,
        fix: Fix::Patch(fix_missing_root_agent),
    },
    Rule {
        id: "constructor_argument_order",
        description: "Agent constructor arguments reordered to name, model, description, instruction, tools",
        severity: Severity::Info,
        detect: detect_argument_order,
        fix: Fix::Patch(fix_argument_order),
    },
    Rule {
        id: "deprecated_blocking_run",
        description: "Blocking invoke/run call replaced with the async session and run_async pattern",
        severity: Severity::Error,
        detect: detect_blocking_run,
        fix: Fix::Patch(fix_blocking_run),
    },
    Rule {
        id: "unawaited_create_session",
        description: "create_session is a coroutine and must be awaited",
        severity: Severity::Error,
        detect: detect_unawaited_session,
        fix: Fix::Patch(fix_unawaited_session),
    },
    Rule {
        id: "runner_missing_app_name",
        description: "Runner constructed without app_name",
        severity: Severity::Error,
        detect: detect_runner_without_app_name,
        fix: Fix::Patch(fix_runner_without_app_name),
    },
    Rule {
        id: "missing_env_loading",
        description: "Environment variables read without calling load_dotenv()",
        severity: Severity::Warning,
        detect: detect_missing_env_loading,
        fix: Fix::Patch(fix_missing_env_loading),
    },
    Rule {
        id: "missing_import",
        description: "Names used without being imported",
        severity: Severity::Error,
        detect: detect_missing_import,
        fix: Fix::Patch(fix_missing_import),
    },
];

/// Look up a rule by id
pub fn rule(id: &str) -> Option<&'static Rule> {
    RULES.iter().find(|rule| rule.id == id)
}

// ----------------------------------------------------------------------
// Shared helpers
// ----------------------------------------------------------------------

const ADK_AGENT_EXPORTS: &[&str] = &[
    "Agent",
    "LlmAgent",
    "BaseAgent",
    "SequentialAgent",
    "ParallelAgent",
    "LoopAgent",
    "InvocationContext",
    "RunConfig",
    "LiveRequestQueue",
];

const AGENT_CONSTRUCTORS: &[&str] = &["LlmAgent", "Agent"];

const CANONICAL_AGENT_ORDER: &[&str] = &["name", "model", "description", "instruction", "tools"];

const MAX_REWRITES: usize = 32;

/// Apply non-overlapping `(start, end, replacement)` edits
fn apply_edits(code: &str, mut edits: Vec<(usize, usize, String)>) -> String {
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    let mut out = code.to_string();
    let mut floor = usize::MAX;
    for (start, end, replacement) in edits {
        if end > floor {
            continue;
        }
        out.replace_range(start..end, &replacement);
        floor = start;
    }
    out
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Code positions of `token` as a whole name (not an attribute)
fn token_positions(source: &Source, token: &str) -> Vec<usize> {
    let text = source.text();
    let bytes = text.as_bytes();
    text.match_indices(token)
        .map(|(pos, _)| pos)
        .filter(|&pos| {
            let before_ok = pos == 0 || !(is_ident_byte(bytes[pos - 1]) || bytes[pos - 1] == b'.');
            let after = pos + token.len();
            let after_ok = after >= bytes.len() || !is_ident_byte(bytes[after]);
            before_ok && after_ok && source.is_code(pos)
        })
        .collect()
}

/// Line start of a module-level `name = ...` binding
fn top_level_binding(source: &Source, name: &str) -> Option<usize> {
    let mut offset = 0;
    for line in source.text().split_inclusive('\n') {
        let start = offset;
        offset += line.len();
        let Some(rest) = line.strip_prefix(name) else {
            continue;
        };
        if !source.is_code(start) {
            continue;
        }
        let rest = rest.trim_start_matches([' ', '\t']);
        let rest = match rest.strip_prefix(':') {
            Some(annotated) => match annotated.find('=') {
                Some(i) => &annotated[i..],
                None => continue,
            },
            None => rest,
        };
        if rest.starts_with('=') && !rest.starts_with("==") {
            return Some(start);
        }
    }
    None
}

/// End (after the newline) of the statement beginning at `line_start`
fn statement_end(source: &Source, line_start: usize) -> usize {
    let text = source.text();
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for pos in line_start..bytes.len() {
        if !source.is_code(pos) {
            continue;
        }
        match bytes[pos] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'\n' if depth <= 0 => return pos + 1,
            _ => {}
        }
    }
    text.len()
}

/// Line start of the logical statement holding `pos`, and the bracket depth at `pos`
fn statement_start(source: &Source, pos: usize) -> (usize, i32) {
    let bytes = source.text().as_bytes();
    let mut depth = 0i32;
    let mut start = 0;
    for i in 0..pos {
        if !source.is_code(i) {
            continue;
        }
        match bytes[i] {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'\n' if depth <= 0 => start = i + 1,
            _ => {}
        }
    }
    (start, depth)
}

fn callee_name<'a>(source: &Source<'a>, call: Call) -> &'a str {
    source.text()[call.start..call.open].trim_end()
}

fn constructor_calls(source: &Source, names: &[&str]) -> Vec<Call> {
    static CONSTRUCTOR: OnceLock<Regex> = OnceLock::new();
    let re = cached(
        &CONSTRUCTOR,
        r"\b(?:LlmAgent|Agent|Runner|MCPToolset|StdioConnectionParams|StdioServerParameters)[ \t]*",
    );
    source
        .calls(re)
        .into_iter()
        .filter(|call| {
            let bytes = source.text().as_bytes();
            let attribute_of_other = call.start > 0 && bytes[call.start - 1] == b'.'
                && !source.text()[..call.start].ends_with("agents.");
            !attribute_of_other && names.contains(&callee_name(source, *call))
        })
        .collect()
}

/// Names bound to agent or runner instances
fn agent_like_names(source: &Source) -> HashSet<String> {
    static AGENT_ASSIGN: OnceLock<Regex> = OnceLock::new();
    let re = cached(
        &AGENT_ASSIGN,
        r"(?m)^[ \t]*(\w+)[ \t]*=[ \t]*(?:[\w.]*\.)?(?:LlmAgent|Agent|Runner)[ \t]*\(",
    );
    let mut names: HashSet<String> = ["root_agent", "agent", "runner"].iter().map(|s| s.to_string()).collect();
    for caps in source.captures_code(re) {
        names.insert(caps[1].to_string());
    }
    names
}

/// Comma-separated names of an import list, aliases resolved to the imported name
fn imported_names(list: &str) -> Vec<String> {
    list.split('#')
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| c == '(' || c == ')' || c.is_whitespace())
        .split(',')
        .map(|item| item.trim().split_whitespace().next().unwrap_or("").to_string())
        .filter(|name| !name.is_empty() && name != "(" && name != ")")
        .collect()
}

fn class_bases(source: &Source) -> Vec<(String, Vec<String>)> {
    static CLASS_DEF: OnceLock<Regex> = OnceLock::new();
    let re = cached(&CLASS_DEF, r"(?m)^[ \t]*class[ \t]+(\w+)[ \t]*\(([^)]*)\)");
    source
        .captures_code(re)
        .into_iter()
        .map(|caps| {
            let bases = caps[2]
                .split(',')
                .map(|base| base.trim())
                .filter(|base| !base.is_empty() && !base.contains('='))
                .map(|base| base.rsplit('.').next().unwrap_or(base).to_string())
                .collect();
            (caps[1].to_string(), bases)
        })
        .collect()
}

fn ensure_constant(code: String, name: &str, value: &str) -> String {
    if top_level_binding(&Source::new(&code), name).is_some() {
        return code;
    }
    pysrc::insert_after_imports(&code, &format!("{} = {}\n", name, python_string(value)))
}

// ----------------------------------------------------------------------
// 1-3: unrecoverable shapes
// ----------------------------------------------------------------------

fn detect_nonexistent_base_class(code: &str, _config: &UnifiedConfiguration) -> bool {
    static AGENTS_IMPORT: OnceLock<Regex> = OnceLock::new();
    let source = Source::new(code);

    let import = cached(
        &AGENTS_IMPORT,
        r"(?m)^[ \t]*from[ \t]+google\.adk\.agents[ \t]+import[ \t]+([^\n#]+)",
    );
    let bad_import = source.captures_code(import).iter().any(|caps| {
        imported_names(&caps[1])
            .iter()
            .any(|name| !ADK_AGENT_EXPORTS.contains(&name.as_str()))
    });
    if bad_import {
        return true;
    }

    let classes = class_bases(&source);
    let defined: HashSet<&str> = classes.iter().map(|(name, _)| name.as_str()).collect();
    classes.iter().flat_map(|(_, bases)| bases).any(|base| {
        base.ends_with("Agent") && !ADK_AGENT_EXPORTS.contains(&base.as_str()) && !defined.contains(base.as_str())
    })
}

const ADK_MODULES: &[&str] = &[
    "",
    "agents",
    "agents.callback_context",
    "agents.invocation_context",
    "agents.readonly_context",
    "agents.run_config",
    "artifacts",
    "auth",
    "code_executors",
    "events",
    "examples",
    "memory",
    "models",
    "models.lite_llm",
    "planners",
    "runners",
    "sessions",
    "tools",
    "tools.agent_tool",
    "tools.base_tool",
    "tools.function_tool",
    "tools.google_search_tool",
    "tools.load_memory_tool",
    "tools.long_running_tool",
    "tools.mcp_tool",
    "tools.mcp_tool.mcp_session_manager",
    "tools.mcp_tool.mcp_toolset",
    "tools.openapi_tool",
    "tools.tool_context",
];

const MCP_HELPERS: &[&str] = &[
    "MCPToolset",
    "McpToolset",
    "MCPTool",
    "McpTool",
    "StdioServerParameters",
    "StdioConnectionParams",
    "SseServerParams",
    "SseConnectionParams",
    "StreamableHTTPConnectionParams",
    "StreamableHTTPServerParams",
];

fn detect_nonexistent_helper_import(code: &str, _config: &UnifiedConfiguration) -> bool {
    static ADK_FROM: OnceLock<Regex> = OnceLock::new();
    static ADK_IMPORT: OnceLock<Regex> = OnceLock::new();
    let source = Source::new(code);

    let from = cached(
        &ADK_FROM,
        r"(?m)^[ \t]*from[ \t]+google\.adk((?:\.\w+)*)[ \t]+import[ \t]+([^\n#]+)",
    );
    for caps in source.captures_code(from) {
        let module = caps[1].trim_start_matches('.');
        if !ADK_MODULES.contains(&module) {
            return true;
        }
        if module.starts_with("tools.mcp_tool")
            && imported_names(&caps[2]).iter().any(|name| !MCP_HELPERS.contains(&name.as_str()))
        {
            return true;
        }
    }

    let import = cached(&ADK_IMPORT, r"(?m)^[ \t]*import[ \t]+google\.adk((?:\.\w+)*)");
    source
        .captures_code(import)
        .iter()
        .any(|caps| !ADK_MODULES.contains(&caps[1].trim_start_matches('.')))
}

fn detect_agent_subclass(code: &str, _config: &UnifiedConfiguration) -> bool {
    class_bases(&Source::new(code))
        .iter()
        .flat_map(|(_, bases)| bases)
        .any(|base| matches!(base.as_str(), "LlmAgent" | "Agent" | "BaseAgent"))
}

// ----------------------------------------------------------------------
// 4: hardcoded secrets
// ----------------------------------------------------------------------

const NON_SECRET_SUFFIXES: &[&str] = &[
    "_env", "_ref", "_name", "_var", "_type", "_url", "_file", "_path", "_id", "_limit", "_header",
];

fn is_secret_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !NON_SECRET_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
        && !lower.starts_with("max_")
        && !lower.starts_with("num_")
}

fn looks_like_env_name(value: &str) -> bool {
    !value.is_empty()
        && value.starts_with(|c: char| c.is_ascii_uppercase())
        && value.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// `(literal_start, literal_end, env_name, dict_value)` for every inline secret
fn secret_literals(code: &str) -> Vec<(usize, usize, String, bool)> {
    static SECRET_ASSIGN: OnceLock<Regex> = OnceLock::new();
    static SECRET_DICT: OnceLock<Regex> = OnceLock::new();
    let source = Source::new(code);
    let mut found = Vec::new();

    let assign = cached(
        &SECRET_ASSIGN,
        r#"(?i)\b(\w*(?:api_?key|token|secret|password)\w*)[ \t]*=[ \t]*("[^"\n]*"|'[^'\n]*')"#,
    );
    for caps in source.captures_code(assign) {
        let name = &caps[1];
        let literal = caps.get(2).map(|m| (m.start(), m.end(), m.as_str()));
        let Some((start, end, raw)) = literal else { continue };
        let value = pysrc::decode_string_literal(raw).unwrap_or_default();
        if value.is_empty() || looks_like_env_name(&value) || !is_secret_name(name) {
            continue;
        }
        found.push((start, end, name.to_ascii_uppercase(), false));
    }

    let dict = cached(
        &SECRET_DICT,
        r#"(?i)["'](\w*(?:api_?key|token|secret|password)\w*)["'][ \t]*:[ \t]*("[^"\n]*"|'[^'\n]*')"#,
    );
    for caps in dict.captures_iter(code) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > 0 && !source.is_code(whole.start() - 1) {
            continue;
        }
        let Some(literal) = caps.get(2) else { continue };
        let name = &caps[1];
        let value = pysrc::decode_string_literal(literal.as_str()).unwrap_or_default();
        if value.is_empty() || looks_like_env_name(&value) || !is_secret_name(name) {
            continue;
        }
        found.push((literal.start(), literal.end(), name.to_ascii_uppercase(), true));
    }

    found
}

fn detect_hardcoded_secret(code: &str, _config: &UnifiedConfiguration) -> bool {
    !secret_literals(code).is_empty()
}

fn fix_hardcoded_secret(code: &str, _config: &UnifiedConfiguration) -> String {
    let edits = secret_literals(code)
        .into_iter()
        .map(|(start, end, env, dict_value)| {
            let lookup = if dict_value {
                format!("os.getenv({}, \"\")", python_string(&env))
            } else {
                format!("os.getenv({})", python_string(&env))
            };
            (start, end, lookup)
        })
        .collect();
    apply_edits(code, edits)
}

// ----------------------------------------------------------------------
// 5: invalid identifiers
// ----------------------------------------------------------------------

fn hyphenated_bindings(source: &Source) -> Vec<String> {
    static HYPHEN_ASSIGN: OnceLock<Regex> = OnceLock::new();
    let re = cached(&HYPHEN_ASSIGN, r"(?m)^[ \t]*([A-Za-z_]\w*(?:-\w+)+)[ \t]*=[^=]");
    let mut names: Vec<String> = source.captures_code(re).iter().map(|caps| caps[1].to_string()).collect();
    names.sort();
    names.dedup();
    names
}

/// Agent `name=` literals that are not identifiers
fn invalid_agent_names(source: &Source) -> Vec<(usize, usize, String)> {
    constructor_calls(source, AGENT_CONSTRUCTORS)
        .into_iter()
        .filter_map(|call| source.find_kwarg(call, "name"))
        .filter_map(|(_, value)| {
            let decoded = pysrc::decode_string_literal(source.arg_text(value))?;
            (!is_identifier(&decoded)).then_some((value.start, value.end, decoded))
        })
        .collect()
}

fn detect_invalid_identifier(code: &str, _config: &UnifiedConfiguration) -> bool {
    let source = Source::new(code);
    !hyphenated_bindings(&source).is_empty() || !invalid_agent_names(&source).is_empty()
}

fn fix_invalid_identifier(code: &str, config: &UnifiedConfiguration) -> String {
    let mut code = code.to_string();

    for name in hyphenated_bindings(&Source::new(&code)) {
        let source = Source::new(&code);
        let replacement = name.replace('-', "_");
        let edits = token_positions(&source, &name)
            .into_iter()
            .map(|pos| (pos, pos + name.len(), replacement.clone()))
            .collect();
        code = apply_edits(&code, edits);
    }

    let source = Source::new(&code);
    let edits = invalid_agent_names(&source)
        .into_iter()
        .map(|(start, end, raw)| {
            let name = sanitize_identifier(&raw).unwrap_or_else(|| config.agent_name.clone());
            (start, end, python_string(&name))
        })
        .collect();
    apply_edits(&code, edits)
}

// ----------------------------------------------------------------------
// 6: misspelled constructor fields
// ----------------------------------------------------------------------

/// `(constructors, wrong, right)`
const FIELD_CORRECTIONS: &[(&[&str], &str, &str)] = &[
    (AGENT_CONSTRUCTORS, "instructions", "instruction"),
    (AGENT_CONSTRUCTORS, "system_instruction", "instruction"),
    (AGENT_CONSTRUCTORS, "system_prompt", "instruction"),
    (AGENT_CONSTRUCTORS, "prompt", "instruction"),
    (AGENT_CONSTRUCTORS, "model_name", "model"),
    (AGENT_CONSTRUCTORS, "llm", "model"),
    (AGENT_CONSTRUCTORS, "tool", "tools"),
    (AGENT_CONSTRUCTORS, "toolsets", "tools"),
    (AGENT_CONSTRUCTORS, "descripton", "description"),
    (AGENT_CONSTRUCTORS, "desc", "description"),
    (AGENT_CONSTRUCTORS, "agent_name", "name"),
    (&["Runner"], "root_agent", "agent"),
    (&["Runner"], "session", "session_service"),
    (&["Runner"], "sessions_service", "session_service"),
    (&["Runner"], "appname", "app_name"),
    (&["Runner"], "application_name", "app_name"),
    (&["MCPToolset"], "connection_param", "connection_params"),
    (&["MCPToolset"], "connection", "connection_params"),
    (&["StdioConnectionParams"], "server_param", "server_params"),
    (&["StdioConnectionParams"], "server_parameters", "server_params"),
    (&["StdioServerParameters"], "cmd", "command"),
    (&["StdioServerParameters"], "arguments", "args"),
    (&["StdioServerParameters"], "environment", "env"),
    (&["StdioServerParameters"], "env_vars", "env"),
];

/// `(name_start, name_end, correct)` for every renameable misspelling
fn misspelled_fields(source: &Source) -> Vec<(usize, usize, &'static str)> {
    let constructors = ["LlmAgent", "Agent", "Runner", "MCPToolset", "StdioConnectionParams", "StdioServerParameters"];
    let mut found = Vec::new();

    for call in constructor_calls(source, &constructors) {
        let callee = callee_name(source, call);
        let kwargs: Vec<_> = source
            .split_args(call.open, call.close)
            .into_iter()
            .filter_map(|arg| source.kwarg(arg))
            .collect();
        let mut present: HashSet<&str> = kwargs.iter().map(|(key, _)| source.arg_text(*key)).collect();

        for (key, _) in &kwargs {
            let name = source.arg_text(*key);
            let correction = FIELD_CORRECTIONS
                .iter()
                .find(|(ctors, wrong, _)| *wrong == name && ctors.contains(&callee));
            if let Some((_, _, right)) = correction {
                if present.insert(*right) {
                    found.push((key.start, key.end, *right));
                }
            }
        }
    }
    found
}

fn detect_misspelled_field(code: &str, _config: &UnifiedConfiguration) -> bool {
    !misspelled_fields(&Source::new(code)).is_empty()
}

fn fix_misspelled_field(code: &str, _config: &UnifiedConfiguration) -> String {
    let edits = misspelled_fields(&Source::new(code))
        .into_iter()
        .map(|(start, end, right)| (start, end, right.to_string()))
        .collect();
    apply_edits(code, edits)
}

// ----------------------------------------------------------------------
// 7: bare tools values
// ----------------------------------------------------------------------

fn bare_tools_values(source: &Source) -> Vec<(usize, usize)> {
    constructor_calls(source, AGENT_CONSTRUCTORS)
        .into_iter()
        .filter_map(|call| source.find_kwarg(call, "tools"))
        .filter_map(|(_, value)| {
            let text = source.arg_text(value);
            let is_list_expression = text.starts_with('[')
                || text.starts_with("list(")
                || text.contains('+')
                || text.contains(" for ")
                || text == "None";
            if is_list_expression {
                return None;
            }
            if is_identifier(text) {
                let list_name = text.ends_with("tools") || text.ends_with("tool_list");
                let bound_to_list = top_level_binding(source, text).is_some_and(|line| {
                    let rest = &source.text()[line + text.len()..];
                    rest.trim_start_matches([' ', '\t', '=']).starts_with('[')
                });
                if list_name || bound_to_list {
                    return None;
                }
            }
            Some((value.start, value.end))
        })
        .collect()
}

fn detect_bare_tools(code: &str, _config: &UnifiedConfiguration) -> bool {
    !bare_tools_values(&Source::new(code)).is_empty()
}

fn fix_bare_tools(code: &str, _config: &UnifiedConfiguration) -> String {
    let edits = bare_tools_values(&Source::new(code))
        .into_iter()
        .map(|(start, end)| (start, end, format!("[{}]", &code[start..end])))
        .collect();
    apply_edits(code, edits)
}

// ----------------------------------------------------------------------
// 8: duplicate toolsets
// ----------------------------------------------------------------------

struct ToolsetDefinition {
    identifier: String,
    /// Block range, including a directly preceding comment line
    start: usize,
    end: usize,
    key: String,
}

/// Command and args of the first `StdioServerParameters(...)` within `range`
fn server_invocation(source: &Source, start: usize, end: usize) -> Option<(String, Vec<pysrc::ListItem>, (usize, usize))> {
    let call = constructor_calls(source, &["StdioServerParameters"])
        .into_iter()
        .find(|call| call.start >= start && call.close < end)?;
    let command = source
        .find_kwarg(call, "command")
        .and_then(|(_, value)| pysrc::decode_string_literal(source.arg_text(value)))
        .unwrap_or_else(|| mcp::DEFAULT_COMMAND.to_string());
    let (_, args) = source.find_kwarg(call, "args")?;
    if !source.arg_text(args).starts_with('[') {
        return None;
    }
    let close = source.matching_bracket(args.start)?;
    Some((command, source.list_items(args.start, close), (args.start, close)))
}

/// Config entry an args list belongs to; a placeholder package resolves to the
/// only configured server
fn matching_config<'c>(
    configs: &[&'c McpConfig],
    in_code: Option<&str>,
    command: &str,
) -> Option<&'c McpConfig> {
    configs
        .iter()
        .find(|c| Some(c.package_ref.as_str()) == in_code && c.command == command)
        .or_else(|| configs.iter().find(|c| Some(c.package_ref.as_str()) == in_code))
        .or_else(|| {
            let stale = in_code.map_or(true, is_placeholder_package);
            (stale && configs.len() == 1).then(|| &configs[0])
        })
        .copied()
}

fn toolset_definitions(source: &Source, config: &UnifiedConfiguration) -> Vec<ToolsetDefinition> {
    static TOOLSET_ASSIGN: OnceLock<Regex> = OnceLock::new();
    let re = cached(&TOOLSET_ASSIGN, r"(?m)^[ \t]*(\w+)[ \t]*=[ \t]*MCPToolset[ \t]*\(");
    let text = source.text();
    let configs: Vec<&McpConfig> = config.enabled_mcp().collect();

    source
        .captures_code(re)
        .into_iter()
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let close = source.matching_bracket(whole.end() - 1)?;
            let mut start = whole.start();
            if start > 0 {
                let previous = pysrc::line_start(text, start - 1);
                if text[previous..start].trim_start().starts_with("# MCP toolset") {
                    start = previous;
                }
            }
            let end = pysrc::line_end_inclusive(text, close);

            let key = match server_invocation(source, whole.start(), close + 1) {
                Some((command, items, _)) => {
                    // keyed by the package the args hold once rule 9 has run
                    let texts: Vec<String> = items.into_iter().map(|item| item.text).collect();
                    let in_code = mcp::package_from_args(&texts);
                    let package = matching_config(&configs, in_code.as_deref(), &command)
                        .map(|c| c.package_ref.clone())
                        .or(in_code);
                    match package {
                        Some(package) => format!("{}|{}", package, command),
                        None => normalized(&text[whole.end()..close]),
                    }
                }
                None => normalized(&text[whole.end()..close]),
            };

            Some(ToolsetDefinition {
                identifier: caps[1].to_string(),
                start,
                end,
                key,
            })
        })
        .collect()
}

fn normalized(text: &str) -> String {
    text.split_whitespace().collect()
}

/// Removals and identifier remaps for repeated toolsets
fn duplicate_toolsets(source: &Source, config: &UnifiedConfiguration) -> (Vec<(usize, usize)>, HashMap<String, String>) {
    let mut kept: HashMap<String, String> = HashMap::new();
    let mut removals = Vec::new();
    let mut remap = HashMap::new();

    for definition in toolset_definitions(source, config) {
        match kept.get(&definition.key) {
            Some(identifier) => {
                removals.push((definition.start, definition.end));
                if *identifier != definition.identifier {
                    remap.insert(definition.identifier, identifier.clone());
                }
            }
            None => {
                kept.insert(definition.key, definition.identifier);
            }
        }
    }
    (removals, remap)
}

/// Agent tool lists containing the same entry twice (after `remap`)
fn tool_lists_needing_dedup(source: &Source, remap: &HashMap<String, String>) -> Vec<(usize, usize, String)> {
    constructor_calls(source, AGENT_CONSTRUCTORS)
        .into_iter()
        .filter_map(|call| source.find_kwarg(call, "tools"))
        .filter(|(_, value)| source.arg_text(*value).starts_with('['))
        .filter_map(|(_, value)| {
            let close = source.matching_bracket(value.start)?;
            let entries: Vec<&str> = source
                .split_args(value.start, close)
                .into_iter()
                .map(|arg| source.arg_text(arg))
                .collect();
            let mut seen = HashSet::new();
            let mapped: Vec<&str> = entries
                .iter()
                .map(|entry| remap.get(*entry).map(String::as_str).unwrap_or(*entry))
                .filter(|entry| seen.insert(*entry))
                .collect();
            (mapped != entries).then(|| (value.start, close + 1, format!("[{}]", mapped.join(", "))))
        })
        .collect()
}

fn detect_duplicate_toolsets(code: &str, config: &UnifiedConfiguration) -> bool {
    let source = Source::new(code);
    let (removals, remap) = duplicate_toolsets(&source, config);
    !removals.is_empty() || !tool_lists_needing_dedup(&source, &remap).is_empty()
}

fn fix_duplicate_toolsets(code: &str, config: &UnifiedConfiguration) -> String {
    let (removals, remap) = duplicate_toolsets(&Source::new(code), config);

    let without_blocks = apply_edits(
        code,
        removals.into_iter().map(|(start, end)| (start, end, String::new())).collect(),
    );

    let source = Source::new(&without_blocks);
    let mut renames = Vec::new();
    for (from, to) in &remap {
        tracing::debug!("[VERIFY] Toolset {} folded into {}", from, to);
        for pos in token_positions(&source, from) {
            renames.push((pos, pos + from.len(), to.clone()));
        }
    }
    let renamed = apply_edits(&without_blocks, renames);

    let source = Source::new(&renamed);
    let edits = tool_lists_needing_dedup(&source, &HashMap::new());
    apply_edits(&renamed, edits)
}

// ----------------------------------------------------------------------
// 9: stale MCP args
// ----------------------------------------------------------------------

fn is_placeholder_package(package: &str) -> bool {
    let lower = package.to_ascii_lowercase();
    ["your", "placeholder", "example", "<", "package-name", "todo"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// `(list_start, list_end_inclusive, replacement)` for args lists that differ from canonical
fn stale_args_lists(source: &Source, config: &UnifiedConfiguration) -> Vec<(usize, usize, String)> {
    let configs: Vec<&McpConfig> = config.enabled_mcp().collect();
    let mut edits = Vec::new();

    for call in constructor_calls(source, &["StdioServerParameters"]) {
        let Some((command, items, (open, close))) = server_invocation(source, call.start, call.close + 1) else {
            continue;
        };
        let texts: Vec<String> = items.iter().map(|item| item.text.clone()).collect();
        let in_code = mcp::package_from_args(&texts);

        let matched = matching_config(&configs, in_code.as_deref(), &command);

        let (package, credential, profile) = match (matched, in_code) {
            (Some(mcp_config), _) => (
                mcp_config.package_ref.clone(),
                mcp_config.credential_variable(),
                mcp_config.profile_id.clone(),
            ),
            (None, Some(package)) if !is_placeholder_package(&package) => (
                package,
                mcp::credential_variable(mcp::DEFAULT_CREDENTIAL_ENV),
                mcp::profile_from_args(&texts),
            ),
            _ => continue,
        };

        let canonical = mcp::canonicalize_args(&texts, &package, &credential, profile.as_deref());
        let mut bare: HashSet<String> = items.iter().filter(|i| i.bare).map(|i| i.text.clone()).collect();
        bare.insert(credential);

        let current: Vec<(&str, bool)> = items.iter().map(|i| (i.text.as_str(), i.bare)).collect();
        let wanted: Vec<(&str, bool)> = canonical.iter().map(|t| (t.as_str(), bare.contains(t))).collect();
        if current != wanted {
            edits.push((open, close + 1, render_args_list(&canonical, &bare)));
        }
    }
    edits
}

fn detect_stale_mcp_args(code: &str, config: &UnifiedConfiguration) -> bool {
    !stale_args_lists(&Source::new(code), config).is_empty()
}

fn fix_stale_mcp_args(code: &str, config: &UnifiedConfiguration) -> String {
    let edits = stale_args_lists(&Source::new(code), config);
    apply_edits(code, edits)
}

// ----------------------------------------------------------------------
// 10: credential guards
// ----------------------------------------------------------------------

/// Credential variables in use, with the environment variable they come from
fn credential_uses(source: &Source, config: &UnifiedConfiguration) -> BTreeMap<String, String> {
    let bindings: HashMap<String, String> = crate::codegen::credential_bindings(config).into_iter().collect();
    let mut uses = BTreeMap::new();

    for call in constructor_calls(source, &["StdioServerParameters"]) {
        let Some((_, items, _)) = server_invocation(source, call.start, call.close + 1) else {
            continue;
        };
        for pair in items.windows(2) {
            if pair[0].text == mcp::AUTH_FLAG && !pair[0].bare && pair[1].bare && is_identifier(&pair[1].text) {
                let var = pair[1].text.clone();
                let env = bindings.get(&var).cloned().unwrap_or_else(|| var.to_ascii_uppercase());
                uses.insert(var, env);
            }
        }
    }

    for (var, env) in &bindings {
        if !token_positions(source, var).is_empty() {
            uses.insert(var.clone(), env.clone());
        }
    }
    uses
}

fn has_guard(source: &Source, var: &str) -> bool {
    let pattern = format!("if not {}", var);
    source.text().match_indices(&pattern).any(|(pos, _)| {
        let after = pos + pattern.len();
        source.is_code(pos)
            && source.text().as_bytes().get(after).map_or(true, |b| !is_ident_byte(*b))
    })
}

fn detect_missing_key_guard(code: &str, config: &UnifiedConfiguration) -> bool {
    let source = Source::new(code);
    credential_uses(&source, config)
        .keys()
        .any(|var| top_level_binding(&source, var).is_none() || !has_guard(&source, var))
}

fn guard_lines(var: &str, env: &str) -> String {
    format!(
        "if not {}:\n    raise ValueError({})\n",
        var,
        python_string(&format!("{} environment variable is not set", env))
    )
}

fn fix_missing_key_guard(code: &str, config: &UnifiedConfiguration) -> String {
    let uses = credential_uses(&Source::new(code), config);
    let mut code = code.to_string();

    for (var, env) in uses {
        let source = Source::new(&code);
        if has_guard(&source, &var) && top_level_binding(&source, &var).is_some() {
            continue;
        }
        code = match top_level_binding(&source, &var) {
            Some(line) => {
                let end = statement_end(&source, line);
                pysrc::insert_lines(&code, end, &guard_lines(&var, &env))
            }
            None => pysrc::insert_after_imports(
                &code,
                &format!(
                    "\n{} = os.getenv({})\n{}",
                    var,
                    python_string(&env),
                    guard_lines(&var, &env)
                ),
            ),
        };
    }
    code
}

// ----------------------------------------------------------------------
// 11: root_agent binding
// ----------------------------------------------------------------------

fn detect_missing_root_agent(code: &str, _config: &UnifiedConfiguration) -> bool {
    top_level_binding(&Source::new(code), "root_agent").is_none()
}

fn canonical_agent_definition(config: &UnifiedConfiguration) -> String {
    format!(
        "\nroot_agent = LlmAgent(\n    name={},\n    model={},\n    description={},\n    instruction={},\n    tools=[google_search]\n)\n",
        python_string(&config.agent_name),
        python_string(&config.agent_model),
        python_string(&config.agent_description),
        python_triple_quoted(&config.agent_instruction)
    )
}

fn fix_missing_root_agent(code: &str, config: &UnifiedConfiguration) -> String {
    static TOP_AGENT_ASSIGN: OnceLock<Regex> = OnceLock::new();
    static MAIN_GUARD: OnceLock<Regex> = OnceLock::new();
    let source = Source::new(code);

    let assign = cached(
        &TOP_AGENT_ASSIGN,
        r"(?m)^(\w+)[ \t]*=[ \t]*(?:[\w.]*\.)?(?:LlmAgent|Agent)[ \t]*\(",
    );
    if let Some(caps) = source.captures_code(assign).last() {
        let start = caps.get(0).map_or(0, |m| m.start());
        let end = statement_end(&source, start);
        return pysrc::insert_lines(code, end, &format!("root_agent = {}\n", &caps[1]));
    }

    let definition = canonical_agent_definition(config);
    let guard = cached(&MAIN_GUARD, r#"(?m)^if[ \t]+__name__[ \t]*==[ \t]*["']__main__["']"#);
    match source.find_code(guard).first() {
        Some(m) => pysrc::insert_lines(code, m.start(), &format!("{}\n", definition)),
        None => {
            let mut out = code.to_string();
            if !out.ends_with('\n') && !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&definition);
            out
        }
    }
}

// ----------------------------------------------------------------------
// 12: agent argument order
// ----------------------------------------------------------------------

/// Reordered argument lists for agent calls out of canonical order
fn misordered_agent_calls(source: &Source) -> Vec<(usize, usize, String)> {
    let text = source.text();
    let mut edits = Vec::new();

    for call in constructor_calls(source, AGENT_CONSTRUCTORS) {
        let args = source.split_args(call.open, call.close);
        let kwargs: Option<Vec<(&str, pysrc::Arg)>> = args
            .iter()
            .map(|arg| source.kwarg(*arg).map(|(key, _)| (source.arg_text(key), *arg)))
            .collect();
        // positional arguments pin the order
        let Some(kwargs) = kwargs else {
            continue;
        };

        let mut ordered = kwargs.clone();
        ordered.sort_by_key(|(name, _)| {
            CANONICAL_AGENT_ORDER
                .iter()
                .position(|canonical| canonical == name)
                .unwrap_or(CANONICAL_AGENT_ORDER.len())
        });
        if ordered.iter().map(|(n, _)| n).eq(kwargs.iter().map(|(n, _)| n)) {
            continue;
        }

        let parts: Vec<&str> = ordered.iter().map(|(_, arg)| source.arg_text(*arg)).collect();
        let first = args[0];
        let replacement = if text[call.open..first.start].contains('\n') {
            let indent = &text[pysrc::line_start(text, first.start)..first.start];
            let closing_indent = " ".repeat(pysrc::indent_width(text, pysrc::line_start(text, call.start)));
            let body: Vec<String> = parts.iter().map(|part| format!("{}{}", indent, part)).collect();
            format!("(\n{}\n{})", body.join(",\n"), closing_indent)
        } else {
            format!("({})", parts.join(", "))
        };
        edits.push((call.open, call.close + 1, replacement));
    }
    edits
}

fn detect_argument_order(code: &str, _config: &UnifiedConfiguration) -> bool {
    !misordered_agent_calls(&Source::new(code)).is_empty()
}

fn fix_argument_order(code: &str, _config: &UnifiedConfiguration) -> String {
    let edits = misordered_agent_calls(&Source::new(code));
    apply_edits(code, edits)
}

// ----------------------------------------------------------------------
// 13: deprecated blocking run
// ----------------------------------------------------------------------

struct BlockingRun {
    /// Start of the dotted receiver chain
    chain_start: usize,
    open: usize,
    close: usize,
}

fn find_blocking_run(source: &Source) -> Option<BlockingRun> {
    static BLOCKING_CALL: OnceLock<Regex> = OnceLock::new();
    let re = cached(&BLOCKING_CALL, r"\b([A-Za-z_]\w*)\.(invoke|run)[ \t]*\(");
    let agents = agent_like_names(source);
    let bytes = source.text().as_bytes();

    for caps in source.captures_code(re) {
        let (Some(whole), Some(receiver)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if receiver.as_str() == "asyncio" {
            continue;
        }
        if &caps[2] == "run" && !agents.contains(receiver.as_str()) {
            continue;
        }
        let open = whole.end() - 1;
        let Some(close) = source.matching_bracket(open) else {
            continue;
        };
        let mut chain_start = whole.start();
        while chain_start > 0 && (is_ident_byte(bytes[chain_start - 1]) || bytes[chain_start - 1] == b'.') {
            chain_start -= 1;
        }
        return Some(BlockingRun { chain_start, open, close });
    }
    None
}

fn detect_blocking_run(code: &str, _config: &UnifiedConfiguration) -> bool {
    find_blocking_run(&Source::new(code)).is_some()
}

enum Message {
    Text(String),
    Content(String),
}

enum Target {
    Assign(String),
    Return,
    Print,
}

fn run_message(source: &Source, call: &BlockingRun) -> Message {
    let args = source.split_args(call.open, call.close);
    for arg in &args {
        if let Some((key, value)) = source.kwarg(*arg) {
            let value = source.arg_text(value).to_string();
            match source.arg_text(key) {
                "new_message" => return Message::Content(value),
                "input" | "message" | "query" | "prompt" | "text" | "user_input" | "content" => {
                    return text_message(value)
                }
                _ => {}
            }
        }
    }
    args.iter()
        .find(|arg| source.kwarg(**arg).is_none())
        .map(|arg| text_message(source.arg_text(*arg).to_string()))
        .unwrap_or_else(|| Message::Text(python_string("Hello")))
}

fn text_message(value: String) -> Message {
    if value.starts_with('{') {
        Message::Text(format!("str({})", value))
    } else {
        Message::Text(value)
    }
}

fn async_run_block(indent: &str, message: &Message, target: &Target) -> String {
    let result_var = match target {
        Target::Assign(var) => Some(var.as_str()),
        Target::Return => Some("response"),
        Target::Print => None,
    };

    let mut block = String::new();
    block.push_str(&format!(
        "{}session = await session_service.create_session(app_name=APP_NAME, user_id=USER_ID)\n",
        indent
    ));
    match message {
        Message::Text(expr) => block.push_str(&format!(
            "{}new_message = types.Content(role=\"user\", parts=[types.Part(text={})])\n",
            indent, expr
        )),
        Message::Content(expr) => block.push_str(&format!("{}new_message = {}\n", indent, expr)),
    }
    if let Some(var) = result_var {
        block.push_str(&format!("{}{} = None\n", indent, var));
    }
    block.push_str(&format!(
        "{}async for event in runner.run_async(user_id=USER_ID, session_id=session.id, new_message=new_message):\n",
        indent
    ));
    block.push_str(&format!(
        "{}    if event.is_final_response() and event.content and event.content.parts:\n",
        indent
    ));
    match result_var {
        Some(var) => block.push_str(&format!("{}        {} = event.content.parts[0].text\n", indent, var)),
        None => block.push_str(&format!("{}        print(event.content.parts[0].text)\n", indent)),
    }
    if let Target::Return = target {
        block.push_str(&format!("{}return response\n", indent));
    }
    block
}

/// Result variable for a blocking call nested inside a larger expression
const NESTED_RESPONSE_VAR: &str = "_agent_response";

/// Replace one blocking call; returns the new code and the def made async, if any
fn rewrite_blocking_run(code: &str, call: &BlockingRun) -> (String, Option<String>) {
    let source = Source::new(code);
    let (line, depth) = statement_start(&source, call.chain_start);
    let indent_len = pysrc::indent_width(code, line);
    let indent = &code[line..line + indent_len];
    let stmt_end = statement_end(&source, line);

    // A call inside brackets is hoisted in front of its statement, which then
    // reads the result variable
    let mut remainder = String::new();
    let target = if depth > 0 {
        let head = &code[line..call.chain_start];
        remainder.push_str(head.trim_end().strip_suffix("await").unwrap_or(head));
        remainder.push_str(NESTED_RESPONSE_VAR);
        remainder.push_str(&code[call.close + 1..stmt_end]);
        if !remainder.ends_with('\n') {
            remainder.push('\n');
        }
        Target::Assign(NESTED_RESPONSE_VAR.to_string())
    } else {
        let prefix = code[line + indent_len..call.chain_start].trim_end();
        let prefix = prefix.strip_suffix("await").map(str::trim_end).unwrap_or(prefix);
        if prefix == "return" {
            Target::Return
        } else {
            match prefix.strip_suffix('=').map(str::trim) {
                Some(lhs) if is_identifier(lhs) => Target::Assign(lhs.to_string()),
                _ => Target::Print,
            }
        }
    };
    let message = run_message(&source, call);

    let enclosing = source.enclosing_def(call.chain_start);
    let (replacement, converted) = match enclosing {
        Some(site) => {
            let block = async_run_block(indent, &message, &target);
            let converted = (!site.is_async).then(|| site.name.clone());
            (block, converted.map(|name| (name, site.line_start + site.indent)))
        }
        None => {
            let inner_indent = format!("{}    ", indent);
            let inner_target = match target {
                Target::Print => Target::Print,
                _ => Target::Return,
            };
            let mut block = format!("{}async def _run_agent():\n", indent);
            block.push_str(&async_run_block(&inner_indent, &message, &inner_target));
            match target {
                Target::Assign(var) => block.push_str(&format!("{}{} = asyncio.run(_run_agent())\n", indent, var)),
                _ => block.push_str(&format!("{}asyncio.run(_run_agent())\n", indent)),
            }
            (block, None)
        }
    };

    let mut edits = vec![(line, stmt_end, format!("{}{}", replacement, remainder))];
    let converted_name = converted.map(|(name, def_pos)| {
        edits.push((def_pos, def_pos, "async ".to_string()));
        name
    });
    (apply_edits(code, edits), converted_name)
}

/// Make every call of the now-async `name` awaited or run
fn adapt_callers(code: &str, name: &str) -> String {
    let source = Source::new(code);
    let text = source.text();
    let mut edits = Vec::new();

    for pos in token_positions(&source, name) {
        let after = pos + name.len();
        let open = after + (text[after..].len() - text[after..].trim_start_matches([' ', '\t']).len());
        if text.as_bytes().get(open) != Some(&b'(') {
            continue;
        }
        let before = text[..pos].trim_end();
        if before.ends_with("def") || before.ends_with("await") || before.ends_with("asyncio.run(") {
            continue;
        }
        let Some(close) = source.matching_bracket(open) else {
            continue;
        };
        let in_async = source.enclosing_def(pos).is_some_and(|site| site.is_async);
        if in_async {
            edits.push((pos, pos, "await ".to_string()));
        } else {
            edits.push((pos, close + 1, format!("asyncio.run({})", &text[pos..=close])));
        }
    }
    apply_edits(code, edits)
}

/// Definitions the async run pattern relies on
fn ensure_runner_support(code: String, config: &UnifiedConfiguration) -> String {
    let mut code = ensure_constant(code, "APP_NAME", &config.agent_name);
    code = ensure_constant(code, "USER_ID", "user");

    let source = Source::new(&code);
    let mut support = String::new();
    if top_level_binding(&source, "session_service").is_none() {
        support.push_str("session_service = InMemorySessionService()\n");
    }
    if top_level_binding(&source, "runner").is_none() {
        support.push_str("runner = Runner(agent=root_agent, session_service=session_service, app_name=APP_NAME)\n");
    }
    if support.is_empty() {
        return code;
    }

    match top_level_binding(&source, "root_agent") {
        Some(line) => {
            let end = statement_end(&source, line);
            pysrc::insert_lines(&code, end, &format!("\n{}", support))
        }
        None => pysrc::insert_after_imports(&code, &format!("\n{}", support)),
    }
}

fn fix_blocking_run(code: &str, config: &UnifiedConfiguration) -> String {
    let mut code = code.to_string();
    for _ in 0..MAX_REWRITES {
        let Some(call) = find_blocking_run(&Source::new(&code)) else {
            break;
        };
        let (rewritten, converted) = rewrite_blocking_run(&code, &call);
        code = rewritten;
        if let Some(name) = converted {
            tracing::debug!("[VERIFY] Converted {}() to async", name);
            code = adapt_callers(&code, &name);
        }
    }
    ensure_runner_support(code, config)
}

// ----------------------------------------------------------------------
// 14: unawaited create_session
// ----------------------------------------------------------------------

fn unawaited_sessions(source: &Source) -> Vec<usize> {
    static CREATE_SESSION: OnceLock<Regex> = OnceLock::new();
    let re = cached(&CREATE_SESSION, r"[\w.]*\bcreate_session[ \t]*\(");
    let text = source.text();

    source
        .find_code(re)
        .into_iter()
        .filter(|m| {
            let line = pysrc::line_start(text, m.start());
            let before = text[line..m.start()].trim_end();
            !before.ends_with("await") && source.enclosing_def(m.start()).is_some_and(|site| site.is_async)
        })
        .map(|m| m.start())
        .collect()
}

fn detect_unawaited_session(code: &str, _config: &UnifiedConfiguration) -> bool {
    !unawaited_sessions(&Source::new(code)).is_empty()
}

fn fix_unawaited_session(code: &str, _config: &UnifiedConfiguration) -> String {
    let edits = unawaited_sessions(&Source::new(code))
        .into_iter()
        .map(|pos| (pos, pos, "await ".to_string()))
        .collect();
    apply_edits(code, edits)
}

// ----------------------------------------------------------------------
// 15: Runner app_name
// ----------------------------------------------------------------------

fn runners_without_app_name(source: &Source) -> Vec<(usize, String)> {
    let text = source.text();
    constructor_calls(source, &["Runner"])
        .into_iter()
        .filter(|call| source.find_kwarg(*call, "app_name").is_none())
        .filter_map(|call| {
            let last = *source.split_args(call.open, call.close).last()?;
            let insertion = if text[last.end..call.close].contains('\n') {
                let indent = &text[pysrc::line_start(text, last.start)..last.start];
                format!(",\n{}app_name=APP_NAME", indent)
            } else {
                ", app_name=APP_NAME".to_string()
            };
            Some((last.end, insertion))
        })
        .collect()
}

fn detect_runner_without_app_name(code: &str, _config: &UnifiedConfiguration) -> bool {
    !runners_without_app_name(&Source::new(code)).is_empty()
}

fn fix_runner_without_app_name(code: &str, config: &UnifiedConfiguration) -> String {
    let edits = runners_without_app_name(&Source::new(code))
        .into_iter()
        .map(|(pos, insertion)| (pos, pos, insertion))
        .collect();
    ensure_constant(apply_edits(code, edits), "APP_NAME", &config.agent_name)
}

// ----------------------------------------------------------------------
// 16: environment loading
// ----------------------------------------------------------------------

fn detect_missing_env_loading(code: &str, _config: &UnifiedConfiguration) -> bool {
    static ENV_ACCESS: OnceLock<Regex> = OnceLock::new();
    static DOTENV_CALL: OnceLock<Regex> = OnceLock::new();
    let source = Source::new(code);
    let reads_env = !source
        .find_code(cached(&ENV_ACCESS, r"\bos\.(?:getenv|environ)\b"))
        .is_empty();
    let loads = !source
        .find_code(cached(&DOTENV_CALL, r"\bload_dotenv[ \t]*\("))
        .is_empty();
    reads_env && !loads
}

fn fix_missing_env_loading(code: &str, _config: &UnifiedConfiguration) -> String {
    let mut code = code.to_string();
    if !Source::new(&code).bound_names().contains("load_dotenv") {
        code = pysrc::insert_import(&code, "from dotenv import load_dotenv");
    }
    pysrc::insert_after_imports(&code, "\nload_dotenv()\n")
}

// ----------------------------------------------------------------------
// 17: missing imports
// ----------------------------------------------------------------------

/// `(usage pattern, bound name, import statement)`
const IMPORT_TABLE: &[(&str, &str, &str)] = &[
    (r"\bos\.", "os", "import os"),
    (r"\basyncio\.", "asyncio", "import asyncio"),
    (r"\blogging\.", "logging", "import logging"),
    (r"\btime\.", "time", "import time"),
    (r"\bEnum\b", "Enum", "from enum import Enum"),
    (r"\bload_dotenv[ \t]*\(", "load_dotenv", "from dotenv import load_dotenv"),
    (r"\bLlmAgent\b", "LlmAgent", "from google.adk.agents import LlmAgent"),
    (r"\bRunner[ \t]*\(", "Runner", "from google.adk.runners import Runner"),
    (
        r"\bInMemorySessionService[ \t]*\(",
        "InMemorySessionService",
        "from google.adk.sessions import InMemorySessionService",
    ),
    (r"\bgoogle_search\b", "google_search", "from google.adk.tools import google_search"),
    (
        r"\bMCPToolset[ \t]*\(",
        "MCPToolset",
        "from google.adk.tools.mcp_tool.mcp_toolset import MCPToolset",
    ),
    (
        r"\bStdioConnectionParams[ \t]*\(",
        "StdioConnectionParams",
        "from google.adk.tools.mcp_tool.mcp_toolset import StdioConnectionParams",
    ),
    (
        r"\bStdioServerParameters[ \t]*\(",
        "StdioServerParameters",
        "from mcp import StdioServerParameters",
    ),
    (r"\btypes\.", "types", "from google.genai import types"),
    (r"\bLangfuse[ \t]*\(", "Langfuse", "from langfuse import Langfuse"),
    (r"\bMemoryClient[ \t]*\(", "MemoryClient", "from mem0 import MemoryClient"),
];

fn import_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        IMPORT_TABLE
            .iter()
            .map(|(pattern, _, _)| Regex::new(pattern).expect("valid regex"))
            .collect()
    })
}

fn missing_imports(code: &str) -> Vec<&'static str> {
    let source = Source::new(code);
    let bound = source.bound_names();
    let bytes = code.as_bytes();

    IMPORT_TABLE
        .iter()
        .zip(import_patterns())
        .filter(|((_, name, _), _)| !bound.contains(*name))
        .filter(|(_, pattern)| {
            source
                .find_code(pattern)
                .iter()
                .any(|m| m.start() == 0 || bytes[m.start() - 1] != b'.')
        })
        .map(|((_, _, statement), _)| *statement)
        .collect()
}

fn detect_missing_import(code: &str, _config: &UnifiedConfiguration) -> bool {
    !missing_imports(code).is_empty()
}

fn fix_missing_import(code: &str, _config: &UnifiedConfiguration) -> String {
    let mut code = code.to_string();
    for statement in missing_imports(&code) {
        tracing::debug!("[VERIFY] Adding `{}`", statement);
        code = pysrc::insert_import(&code, statement);
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;
    use crate::graph::{Node, NodeKind};
    use serde_json::json;

    fn config() -> UnifiedConfiguration {
        extract(
            &[Node::new("a", NodeKind::Agent, "helper")
                .with_attr("instruction", json!("Help the user with their questions."))],
            &[],
        )
    }

    fn mcp_config(package: &str) -> UnifiedConfiguration {
        extract(
            &[
                Node::new("a", NodeKind::Agent, "helper"),
                Node::new("m", NodeKind::McpClient, "").with_attr("smitheryPackage", json!(package)),
            ],
            &[],
        )
    }

    fn run(id: &str, code: &str, config: &UnifiedConfiguration) -> String {
        let rule = rule(id).unwrap();
        assert!((rule.detect)(code, config), "{id} should detect");
        let fixed = rule.apply(code, config);
        assert!(!(rule.detect)(&fixed, config), "{id} still detects after fix:\n{fixed}");
        fixed
    }

    #[test]
    fn test_registry_order_is_fixed() {
        let ids: Vec<&str> = RULES.iter().map(|r| r.id).collect();
        assert_eq!(ids.first(), Some(&"nonexistent_base_class"));
        assert_eq!(ids.last(), Some(&"missing_import"));
        assert_eq!(ids.len(), 17);
        let resynthesized: Vec<&str> = RULES
            .iter()
            .filter(|r| r.strategy() == FixStrategy::Resynthesize)
            .map(|r| r.id)
            .collect();
        assert_eq!(
            resynthesized,
            vec!["nonexistent_base_class", "nonexistent_helper_import", "agent_subclass"]
        );
    }

    #[test]
    fn test_resynthesis_rules() {
        let config = config();
        let cases = [
            ("nonexistent_base_class", "from google.adk.agents import SmartAgent\n"),
            ("nonexistent_base_class", "class Helper(ToolAgent):\n    pass\n"),
            ("nonexistent_helper_import", "from google.adk.helpers import make_agent\n"),
            (
                "nonexistent_helper_import",
                "from google.adk.tools.mcp_tool.mcp_toolset import create_mcp_toolset\n",
            ),
            ("agent_subclass", "class Helper(LlmAgent):\n    pass\n"),
        ];
        for (id, code) in cases {
            let fixed = run(id, code, &config);
            assert!(fixed.contains("root_agent = LlmAgent("));
        }
    }

    #[test]
    fn test_known_imports_are_accepted() {
        let code = "from google.adk.agents import LlmAgent, Agent as A\nfrom google.adk.tools.mcp_tool.mcp_toolset import MCPToolset, StdioConnectionParams\n";
        assert!(!detect_nonexistent_base_class(code, &config()));
        assert!(!detect_nonexistent_helper_import(code, &config()));
    }

    #[test]
    fn test_hardcoded_secret() {
        let code = "API_KEY = \"sk-live-1234567890\"\nclient = Client(secret_key='abc123', key_env=\"OPENAI_API_KEY\")\nenv={\"GITHUB_TOKEN\": \"ghp_xyz\"}\n";
        let fixed = run("hardcoded_secret", code, &config());
        assert!(fixed.contains("API_KEY = os.getenv(\"API_KEY\")"));
        assert!(fixed.contains("secret_key=os.getenv(\"SECRET_KEY\")"));
        assert!(fixed.contains("\"GITHUB_TOKEN\": os.getenv(\"GITHUB_TOKEN\", \"\")"));
        assert!(!fixed.contains("sk-live"));
        assert!(!fixed.contains("ghp_xyz"));
    }

    #[test]
    fn test_dict_entries_need_a_secret_name() {
        let code = "params = {\"max_tokens\": \"4096\", \"token_type\": \"bearer\"}\n";
        assert!(!detect_hardcoded_secret(code, &config()));

        let code = "params = {\"max_tokens\": \"4096\", \"api_key\": \"sk-abc\"}\n";
        let fixed = run("hardcoded_secret", code, &config());
        assert!(fixed.contains("\"max_tokens\": \"4096\""));
        assert!(fixed.contains("\"api_key\": os.getenv(\"API_KEY\", \"\")"));
    }

    #[test]
    fn test_secret_inside_instruction_text_is_ignored() {
        let code = "instruction = \"\"\"Never print api_key = \"abc\" to users\"\"\"\n";
        assert!(!detect_hardcoded_secret(code, &config()));
    }

    #[test]
    fn test_invalid_identifier() {
        let code = "time-toolset = MCPToolset()\nroot_agent = LlmAgent(name=\"My Agent\", tools=[time-toolset])\n";
        let fixed = run("invalid_identifier", code, &config());
        assert!(fixed.contains("time_toolset = MCPToolset()"));
        assert!(fixed.contains("tools=[time_toolset]"));
        assert!(fixed.contains("name=\"my_agent\""));
    }

    #[test]
    fn test_misspelled_fields() {
        let code = "root_agent = LlmAgent(name=\"a\", model_name=\"m\", instructions=\"x\")\nrunner = Runner(agent=root_agent, session=s)\n";
        let fixed = run("misspelled_constructor_field", code, &config());
        assert!(fixed.contains("LlmAgent(name=\"a\", model=\"m\", instruction=\"x\")"));
        assert!(fixed.contains("Runner(agent=root_agent, session_service=s)"));
    }

    #[test]
    fn test_misspelling_not_renamed_onto_existing_field() {
        let code = "root_agent = LlmAgent(instruction=\"a\", prompt=\"b\")\n";
        assert!(!detect_misspelled_field(code, &config()));
    }

    #[test]
    fn test_bare_tools_value() {
        let code = "root_agent = LlmAgent(name=\"a\", tools=google_search)\n";
        let fixed = run("bare_tools_value", code, &config());
        assert!(fixed.contains("tools=[google_search]"));

        let listed = "my_tools = [a, b]\nroot_agent = LlmAgent(name=\"a\", tools=my_tools)\n";
        assert!(!detect_bare_tools(listed, &config()));
    }

    #[test]
    fn test_duplicate_toolsets() {
        let block = |id: &str| {
            format!(
                "# MCP toolset for @a/b\n{id} = MCPToolset(\n    connection_params=StdioConnectionParams(\n        server_params=StdioServerParameters(\n            command=\"npx\",\n            args=[\"-y\", \"@smithery/cli@latest\", \"run\", \"@a/b\"]\n        )\n    )\n)\n"
            )
        };
        let code = format!(
            "{}\n{}\nroot_agent = LlmAgent(name=\"a\", tools=[b_toolset, b_copy])\n",
            block("b_toolset"),
            block("b_copy")
        );
        let fixed = run("duplicate_toolset_definition", &code, &config());
        assert_eq!(fixed.matches("MCPToolset(").count(), 1);
        assert!(fixed.contains("tools=[b_toolset]"));
        assert!(!fixed.contains("b_copy"));
    }

    fn toolset(identifier: &str, package: &str) -> String {
        format!(
            "{identifier} = MCPToolset(\n    connection_params=StdioConnectionParams(\n        server_params=StdioServerParameters(\n            command=\"npx\",\n            args=[\"run\", \"{package}\"]\n        )\n    )\n)\n"
        )
    }

    #[test]
    fn test_placeholder_toolset_counts_as_configured_package() {
        let config = mcp_config("@acme/tasks");
        let code = format!(
            "{}\n{}\nroot_agent = LlmAgent(name=\"a\", tools=[tasks_toolset, other_toolset])\n",
            toolset("tasks_toolset", "@acme/tasks"),
            toolset("other_toolset", "your-package-here")
        );
        let fixed = run("duplicate_toolset_definition", &code, &config);
        assert_eq!(fixed.matches("MCPToolset(").count(), 1);
        assert!(fixed.contains("tools=[tasks_toolset]"));
        assert!(!fixed.contains("other_toolset"));
    }

    #[test]
    fn test_folded_toolset_references_are_renamed() {
        let code = format!(
            "{}\n{}\nextra_tools = [b_copy]\nlogger.info(b_copy)\nroot_agent = LlmAgent(name=\"a\", tools=[b_toolset, b_copy])\n",
            toolset("b_toolset", "@a/b"),
            toolset("b_copy", "@a/b")
        );
        let fixed = run("duplicate_toolset_definition", &code, &config());
        assert!(!fixed.contains("b_copy"));
        assert!(fixed.contains("extra_tools = [b_toolset]\n"));
        assert!(fixed.contains("logger.info(b_toolset)\n"));
        assert!(fixed.contains("tools=[b_toolset]"));
    }

    #[test]
    fn test_stale_mcp_args() {
        let config = mcp_config("@acme/tasks");
        let code = "t = MCPToolset(connection_params=StdioConnectionParams(server_params=StdioServerParameters(command=\"npx\", args=[\"-y\", \"@smithery/cli@latest\", \"run\", \"your-package-here\", \"--key\", \"sk-123\"])))\n";
        let fixed = run("stale_mcp_args", code, &config);
        assert!(fixed.contains(
            "args=[\"-y\", \"@smithery/cli@latest\", \"run\", \"@acme/tasks\", \"--key\", smithery_api_key]"
        ));
    }

    #[test]
    fn test_missing_key_guard() {
        let config = mcp_config("@acme/tasks");
        let code = "import os\n\nt = StdioServerParameters(command=\"npx\", args=[\"run\", \"@acme/tasks\", \"--key\", smithery_api_key])\n";
        let fixed = run("missing_api_key_guard", code, &config);
        assert!(fixed.contains("smithery_api_key = os.getenv(\"SMITHERY_API_KEY\")\nif not smithery_api_key:\n    raise ValueError(\"SMITHERY_API_KEY environment variable is not set\")\n"));
        let definition = fixed.find("smithery_api_key = os.getenv").unwrap();
        assert!(definition < fixed.find("t = StdioServerParameters").unwrap());
    }

    #[test]
    fn test_guard_added_after_existing_definition() {
        let config = mcp_config("@acme/tasks");
        let code = "smithery_api_key = os.getenv(\"SMITHERY_API_KEY\")\nt = StdioServerParameters(args=[\"--key\", smithery_api_key])\n";
        let fixed = run("missing_api_key_guard", code, &config);
        assert!(fixed.starts_with("smithery_api_key = os.getenv(\"SMITHERY_API_KEY\")\nif not smithery_api_key:\n"));
    }

    #[test]
    fn test_missing_root_agent_aliases_existing_agent() {
        let code = "helper = LlmAgent(\n    name=\"helper\",\n)\n\nif __name__ == \"__main__\":\n    pass\n";
        let fixed = run("missing_root_agent", code, &config());
        assert!(fixed.contains(")\nroot_agent = helper\n"));
    }

    #[test]
    fn test_missing_root_agent_defines_canonical_agent() {
        let code = "print('no agent here')\n";
        let fixed = run("missing_root_agent", code, &config());
        assert!(fixed.contains("root_agent = LlmAgent(\n    name=\"helper\""));
        assert!(fixed.contains("tools=[google_search]"));
    }

    #[test]
    fn test_argument_order() {
        let code = "root_agent = LlmAgent(\n    tools=[t],\n    instruction=\"i\",\n    name=\"n\",\n    output_key=\"o\",\n    model=\"m\"\n)\n";
        let fixed = run("constructor_argument_order", code, &config());
        assert!(fixed.contains(
            "LlmAgent(\n    name=\"n\",\n    model=\"m\",\n    instruction=\"i\",\n    tools=[t],\n    output_key=\"o\"\n)"
        ));
    }

    #[test]
    fn test_blocking_run_inside_function() {
        let code = "def main():\n    response = root_agent.invoke(\"What time is it?\")\n    print(response)\n\n\nif __name__ == \"__main__\":\n    main()\n";
        let fixed = run("deprecated_blocking_run", code, &config());
        assert!(fixed.contains("async def main():"));
        assert!(fixed.contains("    session = await session_service.create_session(app_name=APP_NAME, user_id=USER_ID)\n"));
        assert!(fixed.contains("parts=[types.Part(text=\"What time is it?\")]"));
        assert!(fixed.contains("        if event.is_final_response()"));
        assert!(fixed.contains("            response = event.content.parts[0].text\n"));
        assert!(fixed.contains("    asyncio.run(main())"));
        assert!(fixed.contains("APP_NAME = \"helper\""));
        assert!(!fixed.contains(".invoke("));
    }

    #[test]
    fn test_blocking_run_at_module_level() {
        let code = "root_agent = LlmAgent(name=\"helper\")\nresult = root_agent.run(\"hi\")\n";
        let fixed = run("deprecated_blocking_run", code, &config());
        assert!(fixed.contains("async def _run_agent():\n"));
        assert!(fixed.contains("result = asyncio.run(_run_agent())"));
        assert!(fixed.contains("runner = Runner(agent=root_agent, session_service=session_service, app_name=APP_NAME)"));
        let runner = fixed.find("runner = Runner").unwrap();
        assert!(runner < fixed.find("async def _run_agent").unwrap());
    }

    #[test]
    fn test_blocking_run_on_continuation_line() {
        let code = "async def main():\n    print(\n        \"Answer:\",\n        root_agent.invoke(\"hi\"),\n    )\n";
        let fixed = run("deprecated_blocking_run", code, &config());
        assert!(fixed.contains("    _agent_response = None\n    async for event in runner.run_async("));
        assert!(fixed.contains("            _agent_response = event.content.parts[0].text\n"));
        assert!(fixed.contains("    print(\n        \"Answer:\",\n        _agent_response,\n    )\n"));
        assert!(!fixed.contains(".invoke("));
    }

    #[test]
    fn test_blocking_run_inside_loop() {
        let code = "def main():\n    for question in [\"a\", \"b\"]:\n        answer = root_agent.invoke(question)\n        print(answer)\n";
        let fixed = run("deprecated_blocking_run", code, &config());
        assert!(fixed.contains("async def main():\n    for question in [\"a\", \"b\"]:\n        session = await session_service"));
        assert!(fixed.contains("parts=[types.Part(text=question)]"));
        assert!(fixed.contains("        print(answer)\n"));
    }

    #[test]
    fn test_asyncio_run_is_not_blocking() {
        assert!(!detect_blocking_run("asyncio.run(main())\nserver.run(port=1)\n", &config()));
    }

    #[test]
    fn test_unawaited_create_session() {
        let code = "async def main():\n    session = session_service.create_session(app_name=APP_NAME, user_id=USER_ID)\n\ndef sync():\n    s = session_service.create_session()\n";
        let fixed = run("unawaited_create_session", code, &config());
        assert!(fixed.contains("session = await session_service.create_session("));
        assert!(fixed.contains("    s = session_service.create_session()"));
    }

    #[test]
    fn test_runner_app_name() {
        let code = "runner = Runner(\n    agent=root_agent,\n    session_service=session_service\n)\n";
        let fixed = run("runner_missing_app_name", code, &config());
        assert!(fixed.contains("    session_service=session_service,\n    app_name=APP_NAME\n)"));
        assert!(fixed.contains("APP_NAME = \"helper\""));
    }

    #[test]
    fn test_missing_env_loading() {
        let code = "import os\n\nkey = os.getenv(\"X\")\n";
        let fixed = run("missing_env_loading", code, &config());
        assert_eq!(
            fixed,
            "import os\nfrom dotenv import load_dotenv\n\nload_dotenv()\n\nkey = os.getenv(\"X\")\n"
        );
    }

    #[test]
    fn test_missing_imports() {
        let code = "\"\"\"Agent.\"\"\"\nroot_agent = LlmAgent(name=\"a\", tools=[google_search])\nmsg = types.Content(role=\"user\")\nx = event.types.value\n";
        let fixed = run("missing_import", code, &config());
        assert!(fixed.starts_with("\"\"\"Agent.\"\"\"\nfrom google.adk.agents import LlmAgent\n"));
        assert!(fixed.contains("from google.adk.tools import google_search\n"));
        assert!(fixed.contains("from google.genai import types\n"));
        assert!(!fixed.contains("import os"));
    }
}
