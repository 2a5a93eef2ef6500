//! # Python Code Generator for Agents
//!
//! Generates a Google ADK agent module from a [`UnifiedConfiguration`].
//!
//! Every skeleton is assembled from the same sections, in this order:
//! docstring, imports, environment loading, constants, credentials, MCP
//! toolsets, feature setup, tool functions, agent, runner, lifecycle hooks,
//! `main()`, script entry and the `__all__` export.

use super::node_handlers::{self, ToolsetBlock};
use super::skeletons::{self, Skeleton};
use crate::extract::{python_string, python_triple_quoted, UnifiedConfiguration, KNOWN_EVENT_TYPES};

const DEFAULT_USER_MESSAGE: &str = "Hello, agent! What can you help me with?";

/// Template-based Python generator for one configuration
pub struct AgentCodeGenerator<'a> {
    config: &'a UnifiedConfiguration,
    skeleton: Skeleton,
    toolsets: Vec<ToolsetBlock>,
}

impl<'a> AgentCodeGenerator<'a> {
    pub fn new(config: &'a UnifiedConfiguration, skeleton: Skeleton) -> Self {
        Self {
            config,
            skeleton,
            toolsets: node_handlers::build_toolsets(config),
        }
    }

    pub fn skeleton(&self) -> Skeleton {
        self.skeleton
    }

    pub fn toolsets(&self) -> &[ToolsetBlock] {
        &self.toolsets
    }

    /// Generate the complete agent module
    pub fn generate_program(&self) -> String {
        tracing::debug!(
            "[CODEGEN] Rendering {} skeleton with {} toolsets",
            self.skeleton.as_str(),
            self.toolsets.len()
        );
        skeletons::render(self)
    }

    fn uses_langfuse(&self) -> bool {
        match self.skeleton {
            Skeleton::Analytics => true,
            Skeleton::Combined => self.config.langfuse().is_some(),
            _ => false,
        }
    }

    fn uses_memory(&self) -> bool {
        match self.skeleton {
            Skeleton::Memory => true,
            Skeleton::Combined => self.config.memory().is_some(),
            _ => false,
        }
    }

    fn uses_events(&self) -> bool {
        match self.skeleton {
            Skeleton::EventHandling => true,
            Skeleton::Combined => self.config.event_handling().is_some(),
            _ => false,
        }
    }

    fn uses_logging(&self) -> bool {
        self.uses_events() || self.skeleton == Skeleton::Combined
    }

    /// Identifiers placed in the agent's `tools=[...]`
    pub fn tool_identifiers(&self) -> Vec<String> {
        let mut tools: Vec<String> = self.toolsets.iter().map(|t| t.identifier.clone()).collect();
        let mut wants_search = false;

        for tool in &self.config.tools {
            if node_handlers::is_search_tool(tool) {
                wants_search = true;
            } else {
                tools.push(tool.name.clone());
            }
        }

        if wants_search || tools.is_empty() {
            tools.push("google_search".to_string());
        }
        tools
    }

    fn uses_google_search(&self) -> bool {
        self.tool_identifiers().iter().any(|t| t == "google_search")
    }

    // ------------------------------------------------------------------
    // Shared sections
    // ------------------------------------------------------------------

    pub(crate) fn render_header(&self) -> String {
        let mut code = String::new();
        code.push_str(&python_triple_quoted(&format!(
            "{} - {}\n\n{}\n",
            self.config.agent_name,
            self.skeleton.title(),
            self.config.agent_description
        )));
        code.push('\n');
        code.push_str(&self.render_imports());
        code.push_str("\nload_dotenv()\n\n");
        code.push_str(&self.render_constants());
        if self.uses_logging() {
            code.push_str(&self.render_logging_setup());
        }
        code.push_str(&self.render_credentials());
        code
    }

    fn render_imports(&self) -> String {
        let mut imports = vec!["import os", "import asyncio"];
        if self.uses_logging() {
            imports.push("import logging");
        }
        if self.uses_events() {
            imports.push("import time");
            imports.push("from enum import Enum");
        }
        imports.extend([
            "from dotenv import load_dotenv",
            "from google.adk.agents import LlmAgent",
            "from google.adk.runners import Runner",
            "from google.adk.sessions import InMemorySessionService",
        ]);
        if self.uses_google_search() {
            imports.push("from google.adk.tools import google_search");
        }
        if !self.toolsets.is_empty() {
            imports.push("from google.adk.tools.mcp_tool.mcp_toolset import MCPToolset, StdioConnectionParams");
            imports.push("from mcp import StdioServerParameters");
        }
        imports.push("from google.genai import types");
        if self.uses_langfuse() {
            imports.push("from langfuse import Langfuse");
        }
        if self.uses_memory() {
            imports.push("from mem0 import MemoryClient");
        }

        let mut code = imports.join("\n");
        code.push('\n');
        code
    }

    fn render_constants(&self) -> String {
        let user_id = self
            .config
            .memory()
            .filter(|_| self.uses_memory())
            .map(|memory| memory.user_id.as_str())
            .unwrap_or("user");

        let mut code = String::new();
        code.push_str(&format!("APP_NAME = {}\n", python_string(&self.config.agent_name)));
        code.push_str(&format!("USER_ID = {}\n", python_string(user_id)));
        if let Some(memory) = self.config.memory().filter(|_| self.uses_memory()) {
            code.push_str(&format!("MEMORY_TYPE = {}\n", python_string(&memory.memory_type)));
            code.push_str(&format!("MEMORY_SEARCH_LIMIT = {}\n", memory.search_limit));
        }
        code
    }

    fn render_logging_setup(&self) -> String {
        let level = self
            .config
            .event_handling()
            .filter(|_| self.uses_events())
            .map(|events| events.log_level.as_str())
            .unwrap_or("INFO");

        let mut code = String::from("\n");
        code.push_str("logging.basicConfig(\n");
        code.push_str(&format!("    level=logging.{},\n", level));
        code.push_str("    format=\"%(asctime)s [%(levelname)s] %(name)s: %(message)s\"\n");
        code.push_str(")\n");
        code.push_str("logger = logging.getLogger(APP_NAME)\n");
        code
    }

    fn render_credentials(&self) -> String {
        let mut code = String::new();
        for (variable, env) in node_handlers::credential_bindings(self.config) {
            code.push('\n');
            code.push_str(&format!("{} = os.getenv({})\n", variable, python_string(&env)));
            code.push_str(&format!("if not {}:\n", variable));
            code.push_str(&format!(
                "    raise ValueError({})\n",
                python_string(&format!("{} environment variable is not set", env))
            ));
        }
        code
    }

    pub(crate) fn render_toolsets(&self) -> String {
        let mut code = String::new();
        for toolset in &self.toolsets {
            code.push('\n');
            code.push_str(&toolset.code);
        }
        code
    }

    pub(crate) fn render_langfuse_setup(&self) -> String {
        let host = self
            .config
            .langfuse()
            .map(|langfuse| langfuse.host.as_str())
            .unwrap_or(crate::extract::DEFAULT_LANGFUSE_HOST);
        let project = self.config.langfuse().and_then(|l| l.project_name.as_deref());

        let mut code = String::from("\n");
        code.push_str("langfuse = None\n");
        code.push_str("if os.getenv(\"LANGFUSE_PUBLIC_KEY\") and os.getenv(\"LANGFUSE_SECRET_KEY\"):\n");
        code.push_str("    try:\n");
        code.push_str("        langfuse = Langfuse(\n");
        code.push_str("            public_key=os.getenv(\"LANGFUSE_PUBLIC_KEY\"),\n");
        code.push_str("            secret_key=os.getenv(\"LANGFUSE_SECRET_KEY\"),\n");
        code.push_str(&format!(
            "            host=os.getenv(\"LANGFUSE_HOST\", {})\n",
            python_string(host)
        ));
        code.push_str("        )\n");
        code.push_str("        print(\"Langfuse analytics initialized\")\n");
        code.push_str("    except Exception as e:\n");
        code.push_str("        print(f\"Warning: Langfuse initialization failed: {e}\")\n");
        code.push_str("else:\n");
        code.push_str("    print(\"Warning: LANGFUSE_PUBLIC_KEY and LANGFUSE_SECRET_KEY not set. Analytics will be disabled.\")\n");
        code.push_str("\n\n");
        code.push_str("def track_conversation(conversation_id, user_id, metadata):\n");
        code.push_str("    \"\"\"Record an analytics event for a conversation.\"\"\"\n");
        code.push_str("    if not langfuse:\n");
        code.push_str("        return\n");
        code.push_str("    try:\n");
        code.push_str("        langfuse.create_event(\n");
        code.push_str("            name=metadata.get(\"event_type\", \"interaction\"),\n");
        match project {
            Some(project) => code.push_str(&format!(
                "            metadata={{\"conversation_id\": conversation_id, \"user_id\": user_id, \"project\": {}, **metadata}}\n",
                python_string(project)
            )),
            None => code.push_str(
                "            metadata={\"conversation_id\": conversation_id, \"user_id\": user_id, **metadata}\n",
            ),
        }
        code.push_str("        )\n");
        code.push_str("    except Exception as e:\n");
        code.push_str("        print(f\"Warning: Failed to track conversation: {e}\")\n");
        code
    }

    pub(crate) fn render_memory_setup(&self) -> String {
        let mut code = String::from("\n");
        code.push_str(r#"memory_client = None
if os.getenv("MEM0_API_KEY"):
    try:
        memory_client = MemoryClient(api_key=os.getenv("MEM0_API_KEY"))
        print("Mem0 memory initialized")
    except Exception as e:
        print(f"Warning: Mem0 initialization failed, using local memory: {e}")
else:
    print("Warning: MEM0_API_KEY not set. Using local in-process memory.")

_local_memory = []


def store_memory(content, user_id=USER_ID):
    """Persist a piece of conversation in long-term memory."""
    if memory_client:
        try:
            memory_client.add(
                [{"role": "user", "content": content}],
                user_id=user_id,
                metadata={"memory_type": MEMORY_TYPE}
            )
            return
        except Exception as e:
            print(f"Warning: Failed to store memory: {e}")
    _local_memory.append({"user_id": user_id, "content": content})


def search_memory(query, user_id=USER_ID, limit=MEMORY_SEARCH_LIMIT):
    """Return stored memories relevant to the query."""
    if memory_client:
        try:
            results = memory_client.search(query, user_id=user_id, limit=limit)
            if isinstance(results, dict):
                results = results.get("results", [])
            return [item.get("memory", "") for item in results]
        except Exception as e:
            print(f"Warning: Memory search failed: {e}")
    words = set(query.lower().split())
    matches = [
        item["content"]
        for item in _local_memory
        if item["user_id"] == user_id and words & set(item["content"].lower().split())
    ]
    return matches[-limit:]
"#);
        code
    }

    pub(crate) fn render_event_setup(&self) -> String {
        let events = self.config.event_handling();
        let listened: Vec<&str> = match events {
            Some(events) if !events.event_types.is_empty() => {
                events.event_types.iter().map(String::as_str).collect()
            }
            _ => KNOWN_EVENT_TYPES.to_vec(),
        };
        let track_analytics = events.is_some_and(|e| e.track_analytics);

        let mut code = String::from("\n\n");
        code.push_str("class EventType(Enum):\n");
        for event_type in KNOWN_EVENT_TYPES {
            code.push_str(&format!(
                "    {} = {}\n",
                event_type.to_ascii_uppercase(),
                python_string(event_type)
            ));
        }
        code.push_str(r#"

class EventHandler:
    """Dispatches agent lifecycle events to registered listeners."""

    def __init__(self):
        self.listeners = {event_type: [] for event_type in EventType}
        self.history = []

    def on(self, event_type, listener):
        self.listeners[event_type].append(listener)

    def emit(self, event_type, payload=None):
        event = {"type": event_type.value, "timestamp": time.time(), "payload": payload or {}}
        self.history.append(event)
        for listener in self.listeners[event_type]:
            try:
                listener(event)
            except Exception as e:
                logger.error(f"Event listener failed for {event_type.value}: {e}")


def log_event(event):
    logger.info(f"[{event['type']}] {event['payload']}")
"#);
        if track_analytics {
            code.push_str(r#"

event_counts = {}


def record_analytics(event):
    event_counts[event["type"]] = event_counts.get(event["type"], 0) + 1
"#);
        }

        code.push_str("\n\nevent_handler = EventHandler()\n");
        for event_type in &listened {
            code.push_str(&format!(
                "event_handler.on(EventType.{}, log_event)\n",
                event_type.to_ascii_uppercase()
            ));
        }
        if track_analytics {
            code.push_str("for _event_type in EventType:\n");
            code.push_str("    event_handler.on(_event_type, record_analytics)\n");
        }
        code
    }

    pub(crate) fn render_tool_functions(&self) -> String {
        let mut code = String::new();
        for tool in self.config.tools.iter().filter(|t| !node_handlers::is_search_tool(t)) {
            code.push_str("\n\n");
            code.push_str(&node_handlers::render_tool_function(tool));
        }
        code
    }

    /// Agent instruction with the notes of every rendered feature appended
    fn compose_instruction(&self) -> String {
        let mut instruction = self.config.agent_instruction.trim().to_string();

        for mcp in self.config.enabled_mcp() {
            if mcp.available_functions.is_empty() {
                continue;
            }
            instruction.push_str(&format!(
                "\n\nAvailable functions through MCP ({}):",
                mcp.package_ref
            ));
            for function in &mcp.available_functions {
                instruction.push_str(&format!("\n- {}", function));
            }
        }

        if self.uses_memory() {
            instruction.push_str(
                "\n\nMEMORY:\n- Relevant memories from earlier conversations are provided as context\n\
                 - Use them to personalize answers and avoid asking for known information",
            );
        }
        if self.uses_langfuse() {
            instruction.push_str(
                "\n\nANALYTICS:\n- Interactions are tracked for performance monitoring and debugging",
            );
        }
        if self.uses_events() {
            instruction.push_str(
                "\n\nEVENTS:\n- Session, message, tool and error events are emitted for every interaction",
            );
        }
        instruction
    }

    pub(crate) fn render_agent(&self) -> String {
        let mut code = String::from("\n\n");
        code.push_str("root_agent = LlmAgent(\n");
        code.push_str(&format!("    name={},\n", python_string(&self.config.agent_name)));
        code.push_str(&format!("    model={},\n", python_string(&self.config.agent_model)));
        code.push_str(&format!(
            "    description={},\n",
            python_string(&self.config.agent_description)
        ));
        code.push_str(&format!(
            "    instruction={},\n",
            python_triple_quoted(&self.compose_instruction())
        ));
        code.push_str(&format!("    tools=[{}]\n", self.tool_identifiers().join(", ")));
        code.push_str(")\n");
        code.push_str("\nsession_service = InMemorySessionService()\n");
        code.push_str("runner = Runner(agent=root_agent, session_service=session_service, app_name=APP_NAME)\n");
        code
    }

    /// `async for` loop over the runner; `body` lines sit inside the loop
    fn render_run_loop(&self, message_var: &str, body: &[String], except: &[String], finally: &[String]) -> String {
        let mut code = String::new();
        code.push_str(&format!(
            "    new_message = types.Content(role=\"user\", parts=[types.Part(text={})])\n",
            message_var
        ));
        code.push_str("\n    print(f\"User: {user_message}\")\n");
        code.push_str("    try:\n");
        code.push_str("        async for event in runner.run_async(\n");
        code.push_str("            user_id=USER_ID,\n");
        code.push_str("            session_id=session.id,\n");
        code.push_str("            new_message=new_message\n");
        code.push_str("        ):\n");
        code.push_str("            print(event)\n");
        for line in body {
            code.push_str(&format!("            {}\n", line));
        }
        code.push_str("    except Exception as e:\n");
        code.push_str("        print(f\"Error during agent execution: {e}\")\n");
        for line in except {
            code.push_str(&format!("        {}\n", line));
        }
        if !finally.is_empty() {
            code.push_str("    finally:\n");
            for line in finally {
                code.push_str(&format!("        {}\n", line));
            }
        }
        code
    }

    fn render_main_prologue(&self, docstring: &str) -> String {
        let mut code = String::from("\n\n");
        code.push_str("async def main():\n");
        code.push_str(&format!("    \"\"\"{}\"\"\"\n", docstring));
        code.push_str("    session = await session_service.create_session(app_name=APP_NAME, user_id=USER_ID)\n");
        code.push_str(&format!("    user_message = {}\n", python_string(DEFAULT_USER_MESSAGE)));
        code
    }

    pub(crate) fn render_entry_point(&self) -> String {
        let mut code = String::from("\n\n");
        code.push_str("if __name__ == \"__main__\":\n");
        code.push_str("    asyncio.run(main())\n");
        code.push_str("\n\n__all__ = [\"root_agent\"]\n");
        code
    }

    // ------------------------------------------------------------------
    // Skeleton programs
    // ------------------------------------------------------------------

    pub(crate) fn render_standard_program(&self) -> String {
        let mut code = self.render_header();
        code.push_str(&self.render_toolsets());
        code.push_str(&self.render_tool_functions());
        code.push_str(&self.render_agent());
        code.push_str(&self.render_main_prologue("Run a single conversation turn against the agent."));
        code.push_str(&self.render_run_loop("user_message", &[], &[], &[]));
        code.push_str(&self.render_entry_point());
        code
    }

    pub(crate) fn render_analytics_program(&self) -> String {
        let (track_conversations, track_errors) = self
            .config
            .langfuse()
            .map(|l| (l.track_conversations, l.track_errors))
            .unwrap_or((true, true));

        let mut code = self.render_header();
        code.push_str(&self.render_toolsets());
        code.push_str(&self.render_langfuse_setup());
        code.push_str(&self.render_tool_functions());
        code.push_str(&self.render_agent());
        code.push_str(&self.render_main_prologue("Run a tracked conversation turn against the agent."));

        let mut body = Vec::new();
        let mut except = Vec::new();
        let mut finally = Vec::new();
        if track_conversations {
            code.push_str("    track_conversation(session.id, USER_ID, {\"event_type\": \"session_start\", \"agent\": APP_NAME})\n");
            code.push_str("    track_conversation(session.id, USER_ID, {\"event_type\": \"user_message\", \"message\": user_message})\n");
            body.push("track_conversation(session.id, USER_ID, {\"event_type\": \"agent_response\", \"response\": str(event)})".to_string());
            finally.push("track_conversation(session.id, USER_ID, {\"event_type\": \"session_end\"})".to_string());
        }
        if track_errors {
            except.push("track_conversation(session.id, USER_ID, {\"event_type\": \"error\", \"error\": str(e)})".to_string());
        }
        finally.push("if langfuse:".to_string());
        finally.push("    langfuse.flush()".to_string());

        code.push_str(&self.render_run_loop("user_message", &body, &except, &finally));
        code.push_str(&self.render_entry_point());
        code
    }

    pub(crate) fn render_memory_program(&self) -> String {
        let mut code = self.render_header();
        code.push_str(&self.render_toolsets());
        code.push_str(&self.render_memory_setup());
        code.push_str(&self.render_tool_functions());
        code.push_str(&self.render_agent());
        code.push_str(&self.render_main_prologue("Run a conversation turn enriched with long-term memory."));
        code.push_str(r#"    memories = search_memory(user_message)
    prompt = user_message
    if memories:
        context = "\n".join(f"- {memory}" for memory in memories)
        prompt = f"Relevant memories:\n{context}\n\nUser message: {user_message}"
    responses = []
"#);
        let body = vec![
            "if event.is_final_response() and event.content and event.content.parts:".to_string(),
            "    responses.append(event.content.parts[0].text or \"\")".to_string(),
        ];
        code.push_str(&self.render_run_loop("prompt", &body, &[], &[]));
        code.push_str(r#"
    store_memory(f"User: {user_message}")
    if responses:
        store_memory(f"Assistant: {responses[-1]}")
"#);
        code.push_str(&self.render_entry_point());
        code
    }

    pub(crate) fn render_event_handling_program(&self) -> String {
        let mut code = self.render_header();
        code.push_str(&self.render_toolsets());
        code.push_str(&self.render_event_setup());
        code.push_str(&self.render_tool_functions());
        code.push_str(&self.render_agent());
        code.push_str(&self.render_main_prologue("Run a conversation turn with lifecycle events."));
        code.push_str("    event_handler.emit(EventType.SESSION_START, {\"session_id\": session.id})\n");
        code.push_str("    event_handler.emit(EventType.USER_MESSAGE, {\"message\": user_message})\n");

        let body = vec![
            "event_handler.emit(EventType.AGENT_RESPONSE, {\"response\": str(event)})".to_string(),
            "if event.get_function_calls():".to_string(),
            "    event_handler.emit(EventType.TOOL_CALL, {\"calls\": [call.name for call in event.get_function_calls()]})".to_string(),
        ];
        let except = vec!["event_handler.emit(EventType.ERROR, {\"error\": str(e)})".to_string()];
        let finally = vec!["event_handler.emit(EventType.SESSION_END, {\"session_id\": session.id})".to_string()];
        code.push_str(&self.render_run_loop("user_message", &body, &except, &finally));
        code.push_str(&self.render_entry_point());
        code
    }

    /// Superset skeleton: every enabled side feature initialized together and
    /// wired through the session lifecycle hooks.
    pub(crate) fn render_combined_program(&self) -> String {
        let langfuse = self.uses_langfuse();
        let memory = self.uses_memory();
        let events = self.uses_events();

        let mut code = self.render_header();
        code.push_str(&self.render_toolsets());
        if langfuse {
            code.push_str(&self.render_langfuse_setup());
        }
        if memory {
            code.push_str(&self.render_memory_setup());
        }
        if events {
            code.push_str(&self.render_event_setup());
        }
        code.push_str(&self.render_tool_functions());
        code.push_str(&self.render_agent());

        code.push_str("\n\ndef on_session_start(session_id):\n");
        code.push_str("    \"\"\"Notify every enabled integration that a session started.\"\"\"\n");
        code.push_str("    logger.info(f\"Session started: {session_id}\")\n");
        if langfuse {
            code.push_str("    track_conversation(session_id, USER_ID, {\"event_type\": \"session_start\", \"agent\": APP_NAME})\n");
        }
        if events {
            code.push_str("    event_handler.emit(EventType.SESSION_START, {\"session_id\": session_id})\n");
        }

        code.push_str("\n\ndef on_message(session_id, user_message):\n");
        code.push_str("    \"\"\"Per-message hook. Returns the prompt sent to the agent.\"\"\"\n");
        code.push_str("    logger.info(f\"User message in session {session_id}\")\n");
        if langfuse {
            code.push_str("    track_conversation(session_id, USER_ID, {\"event_type\": \"user_message\", \"message\": user_message})\n");
        }
        if events {
            code.push_str("    event_handler.emit(EventType.USER_MESSAGE, {\"message\": user_message})\n");
        }
        code.push_str("    prompt = user_message\n");
        if memory {
            code.push_str(r#"    memories = search_memory(user_message)
    if memories:
        context = "\n".join(f"- {memory}" for memory in memories)
        prompt = f"Relevant memories:\n{context}\n\nUser message: {user_message}"
    store_memory(f"User: {user_message}")
"#);
        }
        code.push_str("    return prompt\n");

        code.push_str("\n\ndef on_response(session_id, event):\n");
        code.push_str("    \"\"\"Per-event hook for agent output.\"\"\"\n");
        code.push_str("    logger.debug(f\"Agent event in session {session_id}\")\n");
        if langfuse {
            code.push_str("    track_conversation(session_id, USER_ID, {\"event_type\": \"agent_response\", \"response\": str(event)})\n");
        }
        if events {
            code.push_str("    event_handler.emit(EventType.AGENT_RESPONSE, {\"response\": str(event)})\n");
            code.push_str("    if event.get_function_calls():\n");
            code.push_str("        event_handler.emit(EventType.TOOL_CALL, {\"calls\": [call.name for call in event.get_function_calls()]})\n");
        }

        code.push_str("\n\ndef on_error(session_id, error):\n");
        code.push_str("    \"\"\"Report a failed agent run to every enabled integration.\"\"\"\n");
        code.push_str("    logger.error(f\"Agent error in session {session_id}: {error}\")\n");
        if langfuse {
            code.push_str("    track_conversation(session_id, USER_ID, {\"event_type\": \"error\", \"error\": str(error)})\n");
        }
        if events {
            code.push_str("    event_handler.emit(EventType.ERROR, {\"error\": str(error)})\n");
        }

        code.push_str("\n\ndef on_session_end(session_id, responses):\n");
        code.push_str("    \"\"\"Flush and close every enabled integration.\"\"\"\n");
        code.push_str("    logger.info(f\"Session ended: {session_id}\")\n");
        if memory {
            code.push_str("    if responses:\n");
            code.push_str("        store_memory(f\"Assistant: {responses[-1]}\")\n");
        }
        if langfuse {
            code.push_str("    track_conversation(session_id, USER_ID, {\"event_type\": \"session_end\"})\n");
            code.push_str("    if langfuse:\n");
            code.push_str("        langfuse.flush()\n");
        }
        if events {
            code.push_str("    event_handler.emit(EventType.SESSION_END, {\"session_id\": session_id, \"responses\": len(responses)})\n");
        }

        code.push_str(&self.render_main_prologue("Run a conversation turn through every enabled integration."));
        code.push_str("    on_session_start(session.id)\n");
        code.push_str("    prompt = on_message(session.id, user_message)\n");
        code.push_str("    responses = []\n");
        let body = vec![
            "on_response(session.id, event)".to_string(),
            "if event.is_final_response() and event.content and event.content.parts:".to_string(),
            "    responses.append(event.content.parts[0].text or \"\")".to_string(),
        ];
        let except = vec!["on_error(session.id, e)".to_string()];
        let finally = vec!["on_session_end(session.id, responses)".to_string()];
        code.push_str(&self.render_run_loop("prompt", &body, &except, &finally));
        code.push_str(&self.render_entry_point());
        code
    }
}

/// Canonical artifact used when verification discards unrecoverable code.
///
/// Built only from the agent identity, model and the first MCP server.
pub fn render_canonical_agent(config: &UnifiedConfiguration) -> String {
    let canonical = UnifiedConfiguration {
        mcp_configs: config.enabled_mcp().take(1).cloned().collect(),
        tools: Vec::new(),
        langfuse_config: None,
        memory_config: None,
        event_handling_config: None,
        ..config.clone()
    };
    AgentCodeGenerator::new(&canonical, Skeleton::Standard).generate_program()
}
