//! Companion files shipped next to `agent.py`.

use crate::codegen::credential_bindings;
use crate::extract::UnifiedConfiguration;
use std::collections::{BTreeMap, BTreeSet};

pub const AGENT_FILE: &str = "agent.py";
pub const INIT_FILE: &str = "__init__.py";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";
pub const ENV_TEMPLATE_FILE: &str = ".env.example";

/// Package initializer re-exporting `root_agent`
pub fn init_file(config: &UnifiedConfiguration) -> String {
    format!(
        "\"\"\"{} package.\"\"\"\nfrom .agent import root_agent\n\n__all__ = [\"root_agent\"]\n",
        config.agent_name
    )
}

pub fn requirements(config: &UnifiedConfiguration) -> String {
    let mut lines = vec!["google-adk", "python-dotenv"];
    if config.has_mcp() {
        lines.push("mcp");
    }
    if config.langfuse().is_some() {
        lines.push("langfuse");
    }
    if config.memory().is_some() {
        lines.push("mem0ai");
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// `.env.example` with one placeholder per variable the enabled features read
pub fn env_template(config: &UnifiedConfiguration) -> String {
    let mut out = String::from("# Copy to .env and fill in real values\n");
    out.push_str("GOOGLE_API_KEY=your_google_api_key_here\n");

    let mut seen: BTreeSet<String> = BTreeSet::new();
    seen.insert("GOOGLE_API_KEY".to_string());

    if config.has_mcp() {
        out.push_str("\n# MCP servers\n");
        for (_, env) in credential_bindings(config) {
            if seen.insert(env.clone()) {
                out.push_str(&format!("{}={}\n", env, placeholder(&env)));
            }
        }
        for mcp in config.enabled_mcp() {
            for name in mcp.env_vars.keys() {
                if name != "NODE_OPTIONS" && seen.insert(name.clone()) {
                    out.push_str(&format!("{}={}\n", name, placeholder(name)));
                }
            }
        }
    }

    if let Some(langfuse) = config.langfuse() {
        out.push_str("\n# Langfuse analytics\n");
        out.push_str("LANGFUSE_PUBLIC_KEY=your_langfuse_public_key_here\n");
        out.push_str("LANGFUSE_SECRET_KEY=your_langfuse_secret_key_here\n");
        out.push_str(&format!("LANGFUSE_HOST={}\n", langfuse.host));
    }

    if config.memory().is_some() {
        out.push_str("\n# Mem0 memory\n");
        out.push_str("MEM0_API_KEY=your_mem0_api_key_here\n");
    }
    out
}

fn placeholder(env: &str) -> String {
    format!("your_{}_here", env.to_ascii_lowercase())
}

/// All output files, the verified agent code included
pub fn files(code: &str, config: &UnifiedConfiguration) -> BTreeMap<String, String> {
    let mut files = additional_files(config);
    files.insert(AGENT_FILE.to_string(), code.to_string());
    files
}

/// Everything except `agent.py`
pub fn additional_files(config: &UnifiedConfiguration) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INIT_FILE.to_string(), init_file(config)),
        (REQUIREMENTS_FILE.to_string(), requirements(config)),
        (ENV_TEMPLATE_FILE.to_string(), env_template(config)),
    ])
}
