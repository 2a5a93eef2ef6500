//! Prompt construction for external text generation.

use super::skeletons::{select_skeleton, Skeleton};
use super::CompositionMode;
use crate::extract::{UnifiedConfiguration, KNOWN_EVENT_TYPES};

const SYSTEM_PROMPT: &str = "You are an expert Python developer who writes Google ADK agents. \
Reply with one complete Python module and nothing else.

Rules:
- Build the agent with `LlmAgent(name=..., model=..., description=..., instruction=..., tools=[...])` bound to `root_agent`.
- Never subclass LlmAgent, Agent or BaseAgent.
- Import LlmAgent from google.adk.agents, Runner from google.adk.runners and InMemorySessionService from google.adk.sessions.
- Connect MCP servers with `MCPToolset(connection_params=StdioConnectionParams(server_params=StdioServerParameters(command=..., args=[...], env={...})))`.
- Read every credential with os.getenv after calling load_dotenv(). Never write secret values into the code.
- Run the agent inside `async def main()` with `await session_service.create_session(app_name=APP_NAME, user_id=USER_ID)` and `async for event in runner.run_async(...)`.
- Finish with `if __name__ == \"__main__\": asyncio.run(main())` and `__all__ = [\"root_agent\"]`.";

/// Fixed system prompt
pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// Whether `feature` belongs in the output under `mode`.
///
/// Standard mode renders the primary skeleton's feature only; combined mode
/// renders every enabled feature.
pub fn requests_feature(config: &UnifiedConfiguration, mode: CompositionMode, feature: &str) -> bool {
    match select_skeleton(config, mode) {
        Skeleton::Combined => true,
        skeleton => skeleton.feature() == Some(feature),
    }
}

/// Feature-aware description of the agent to generate under `mode`
pub fn user_prompt(config: &UnifiedConfiguration, mode: CompositionMode) -> String {
    let mut prompt = String::new();
    prompt.push_str("Generate a Google ADK agent with this configuration.\n\n");
    prompt.push_str(&format!("Agent name: {}\n", config.agent_name));
    prompt.push_str(&format!("Model: {}\n", config.agent_model));
    prompt.push_str(&format!("Description: {}\n", config.agent_description));
    prompt.push_str(&format!("Instruction:\n{}\n", config.agent_instruction));
    prompt.push_str(&format!(
        "Complexity: {} ({} nodes, {} edges)\n",
        config.complexity.as_str(),
        config.node_count,
        config.edge_count
    ));

    if !config.tools.is_empty() {
        prompt.push_str("\nCustom function tools:\n");
        for tool in &config.tools {
            prompt.push_str(&format!("- {} ({}): {}\n", tool.name, tool.kind, tool.description));
        }
    }

    let servers: Vec<_> = config.enabled_mcp().collect();
    if !servers.is_empty() {
        prompt.push_str("\nMCP servers (one MCPToolset each):\n");
        for mcp in servers {
            prompt.push_str(&format!(
                "- package {} via `{}` with args {:?}; read the credential from the {} environment variable into `{}`\n",
                mcp.package_ref,
                mcp.command,
                mcp.args,
                mcp.credential_env(),
                mcp.credential_variable()
            ));
            if !mcp.env_vars.is_empty() {
                let names: Vec<&str> = mcp.env_vars.keys().map(String::as_str).collect();
                prompt.push_str(&format!("  environment variables: {}\n", names.join(", ")));
            }
            if !mcp.available_functions.is_empty() {
                prompt.push_str(&format!("  functions: {}\n", mcp.available_functions.join(", ")));
            }
        }
    } else if config.tools.is_empty() {
        prompt.push_str("\nTools: use google_search from google.adk.tools.\n");
    }

    let langfuse = config.langfuse().filter(|_| requests_feature(config, mode, "langfuse"));
    if let Some(langfuse) = langfuse {
        prompt.push_str(&format!(
            "\nLangfuse analytics: initialize Langfuse from LANGFUSE_PUBLIC_KEY, LANGFUSE_SECRET_KEY and LANGFUSE_HOST (default {}) and record conversation events",
            langfuse.host
        ));
        if langfuse.track_errors {
            prompt.push_str(" and errors");
        }
        prompt.push_str(".\n");
    }
    if let Some(memory) = config.memory().filter(|_| requests_feature(config, mode, "memory")) {
        prompt.push_str(&format!(
            "\nMemory: use mem0 MemoryClient with MEM0_API_KEY ({} memory, user id {}, search limit {}); search memories before each message and store the exchange afterwards.\n",
            memory.memory_type, memory.user_id, memory.search_limit
        ));
    }
    if let Some(events) = config
        .event_handling()
        .filter(|_| requests_feature(config, mode, "event_handling"))
    {
        let types = if events.event_types.is_empty() {
            KNOWN_EVENT_TYPES.join(", ")
        } else {
            events.event_types.join(", ")
        };
        prompt.push_str(&format!(
            "\nEvent handling: define an EventType Enum and an EventHandler that logs these events at {} level: {}.\n",
            events.log_level, types
        ));
    }
    if mode == CompositionMode::Combined {
        prompt.push_str(
            "\nCompose every feature above into one module and expose on_session_start, on_message and on_session_end lifecycle functions that drive them.\n",
        );
    }

    prompt
}

/// Strip a surrounding Markdown code fence, if any
pub fn strip_code_fences(response: &str) -> String {
    let trimmed = response.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    let after_open = &trimmed[start + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
    let body = &after_open[body_start..];
    let body = match body.rfind("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}
