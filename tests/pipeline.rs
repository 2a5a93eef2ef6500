//! End-to-end compilation scenarios.

use agc::codegen::{generate_with_templates, Skeleton};
use agc::{
    compile_graph, compile_graph_with_request, compile_graph_with_strategy, verify, AgcError, AgentGraph,
    CompositionMode, Edge, ExternalStrategy, GenerationMethod, GenerationRequest, Node, NodeKind, ProgressStep,
    TemplateStrategy, TextGenerator, UnifiedConfiguration,
};
use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Initialize test logging
fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn agent(label: &str) -> Node {
    Node::new("agent", NodeKind::Agent, label)
        .with_attr("instruction", json!("Answer questions about the weather in any city."))
}

fn mcp(id: &str, package: &str) -> Node {
    Node::new(id, NodeKind::McpClient, id).with_attr("smitheryPackage", json!(package))
}

fn edge(target: &str) -> Edge {
    Edge {
        id: format!("agent-{}", target),
        source_id: "agent".to_string(),
        target_id: target.to_string(),
    }
}

/// Re-verifying verified code must not fix anything
fn assert_converged(code: &str, config: &UnifiedConfiguration) {
    let again = verify(code, config);
    let fixed: Vec<&str> = again.errors.iter().filter(|f| f.fixed).map(|f| f.kind.as_str()).collect();
    assert!(fixed.is_empty(), "second pass fixed {:?}", fixed);
    assert!(again.warnings.is_empty(), "second pass warned {:?}", again.warnings);
    assert_eq!(again.fixed_code, code);
}

#[test]
fn test_empty_graph_still_produces_default_agent() {
    init_test_logging();
    let compiled = compile_graph(&AgentGraph::default());

    assert!(!compiled.configuration.is_valid);
    assert_eq!(compiled.configuration.errors.len(), 1);
    assert!(compiled.configuration.errors[0].starts_with("Missing agent node"));

    let code = compiled.agent_code();
    assert!(code.contains("root_agent = LlmAgent("));
    assert!(code.contains("name=\"adk_agent\""));
    assert!(code.contains("tools=[google_search]"));
    assert!(code.contains("asyncio.run(main())"));
    assert!(compiled.verification.is_valid);
    assert!(compiled.verification.errors.is_empty());
    assert_eq!(compiled.files.len(), 4);
}

#[test]
fn test_duplicate_mcp_nodes_render_one_toolset() {
    init_test_logging();
    let graph = AgentGraph::new(
        vec![agent("weather"), mcp("m1", "@acme/weather"), mcp("m2", "@acme/weather")],
        vec![edge("m1"), edge("m2")],
    );
    let compiled = compile_graph(&graph);

    assert_eq!(compiled.configuration.mcp_configs.len(), 1);
    assert!(compiled
        .configuration
        .warnings
        .iter()
        .any(|w| w.starts_with("Duplicate MCP declaration for @acme/weather")));

    let code = compiled.agent_code();
    assert_eq!(code.matches("= MCPToolset(").count(), 1);
    assert!(code.contains("tools=[weather_toolset]"));
    assert!(code.contains("\"run\", \"@acme/weather\", \"--key\", smithery_api_key]"));
    assert!(compiled.files["requirements.txt"].contains("mcp\n"));
    assert!(compiled.files[".env.example"].contains("SMITHERY_API_KEY=your_smithery_api_key_here"));
}

const BLOCKING_AGENT: &str = r#"```python
import os
from dotenv import load_dotenv
from google.adk.agents import LlmAgent
from google.adk.tools import google_search

load_dotenv()

root_agent = LlmAgent(
    name="weather",
    model="gemini-2.0-flash",
    description="Answers weather questions.",
    instruction="Answer questions about the weather using search.",
    tools=[google_search]
)


def main():
    response = root_agent.invoke("What is the weather in Paris?")
    print(response)


if __name__ == "__main__":
    main()
```"#;

struct StubGenerator(std::result::Result<&'static str, &'static str>);

#[async_trait]
impl TextGenerator for StubGenerator {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, _system_prompt: &str, _user_prompt: &str) -> agc::Result<String> {
        match self.0 {
            Ok(text) => Ok(text.to_string()),
            Err(message) => Err(AgcError::ExternalGeneration(message.to_string())),
        }
    }
}

#[tokio::test]
async fn test_blocking_run_from_external_output_is_rewritten() {
    init_test_logging();
    let graph = AgentGraph::new(vec![agent("weather")], vec![]);
    let generator = StubGenerator(Ok(BLOCKING_AGENT));
    let strategy = ExternalStrategy::new(&generator);
    let mut steps: Vec<ProgressStep> = Vec::new();

    let compiled = compile_graph_with_strategy(&graph, &strategy, CompositionMode::Standard, &mut steps).await;

    assert_eq!(compiled.generation.method, GenerationMethod::External);
    assert!(!compiled.generation.fell_back);

    let finding = compiled
        .verification
        .errors
        .iter()
        .find(|f| f.kind == "deprecated_blocking_run")
        .expect("blocking run finding");
    assert!(finding.fixed);

    let code = compiled.agent_code();
    assert!(!code.contains(".invoke("));
    assert!(code.contains("async def main():"));
    assert!(code.contains("await session_service.create_session(app_name=APP_NAME, user_id=USER_ID)"));
    assert!(code.contains("runner.run_async(user_id=USER_ID, session_id=session.id, new_message=new_message)"));
    assert!(code.contains("    asyncio.run(main())"));
    assert!(code.contains("import asyncio\n"));
    assert!(code.contains("from google.genai import types\n"));
    assert!(code.contains("runner = Runner(agent=root_agent, session_service=session_service, app_name=APP_NAME)"));
    assert!(code.ends_with("__all__ = [\"root_agent\"]\n"));
    assert!(compiled.verification.is_valid);
    assert_eq!(steps.len(), 5);

    assert_converged(code, &compiled.configuration);
}

const GUARDED_PREAMBLE: &str = r#"import os
from dotenv import load_dotenv
from google.adk.agents import LlmAgent
from google.adk.tools.mcp_tool.mcp_toolset import MCPToolset, StdioConnectionParams
from mcp import StdioServerParameters

load_dotenv()

smithery_api_key = os.getenv("SMITHERY_API_KEY")
if not smithery_api_key:
    raise ValueError("SMITHERY_API_KEY environment variable is not set")
"#;

fn toolset_block(identifier: &str, package: &str, env: &str) -> String {
    format!(
        "\n{identifier} = MCPToolset(\n    connection_params=StdioConnectionParams(\n        server_params=StdioServerParameters(\n            command=\"npx\",\n            args=[\"-y\", \"@smithery/cli@latest\", \"run\", \"{package}\", \"--key\", smithery_api_key],\n            env={{{env}}}\n        )\n    )\n)\n"
    )
}

const TASKS_AGENT: &str = "\nroot_agent = LlmAgent(\n    name=\"tasks\",\n    model=\"gemini-2.0-flash\",\n    instruction=\"Keep track of the user's tasks.\",\n    tools=[tasks_toolset, other_toolset]\n)\n";

/// Defects whose fixes feed each other; one pass must settle all of them
fn interacting_defects() -> Vec<(&'static str, String)> {
    let real = toolset_block("tasks_toolset", "@acme/tasks", "\"SMITHERY_API_KEY\": smithery_api_key");
    let placeholder = toolset_block("other_toolset", "your-package-here", "\"SMITHERY_API_KEY\": smithery_api_key");
    let leaky = toolset_block("other_toolset", "<package-name>", "\"SMITHERY_API_KEY\": \"sk-live-0123456789\"");

    vec![
        (
            "placeholder args next to a real toolset",
            format!("{GUARDED_PREAMBLE}{real}{placeholder}{TASKS_AGENT}"),
        ),
        (
            "placeholder duplicate referenced outside the tool list",
            format!("{GUARDED_PREAMBLE}{real}{placeholder}{TASKS_AGENT}\nEXTRA_TOOLS = [other_toolset]\n"),
        ),
        (
            "inline secret inside a toolset that is folded away",
            format!("{GUARDED_PREAMBLE}{real}{leaky}{TASKS_AGENT}"),
        ),
        (
            "blocking run inside a loop",
            format!(
                "{GUARDED_PREAMBLE}{real}{placeholder}{TASKS_AGENT}\n\ndef main():\n    for question in [\"What is due today?\", \"What is overdue?\"]:\n        answer = root_agent.invoke(question)\n        print(answer)\n\n\nif __name__ == \"__main__\":\n    main()\n"
            ),
        ),
        (
            "blocking run nested in a module-level call",
            format!("{GUARDED_PREAMBLE}{real}{placeholder}{TASKS_AGENT}\nprint(\n    \"Answer:\",\n    root_agent.invoke(\"What is due today?\"),\n)\n"),
        ),
    ]
}

#[test]
fn test_interacting_defects_converge_in_one_pass() {
    init_test_logging();
    let graph = AgentGraph::new(
        vec![agent("tasks"), mcp("m1", "@acme/tasks")],
        vec![edge("m1")],
    );
    let config = agc::extract_graph(&graph);

    for (name, code) in interacting_defects() {
        let first = verify(&code, &config);
        assert!(first.fixed_count() > 0, "{name}: nothing fixed");
        assert!(first.is_valid, "{name}: {:#?}", first.errors);

        let fixed = &first.fixed_code;
        assert_eq!(fixed.matches("= MCPToolset(").count(), 1, "{name}:\n{fixed}");
        assert!(!fixed.contains("other_toolset"), "{name}:\n{fixed}");
        assert!(!fixed.contains("sk-live"), "{name}:\n{fixed}");
        assert!(!fixed.contains(".invoke("), "{name}:\n{fixed}");
        assert!(fixed.contains("tools=[tasks_toolset]"), "{name}:\n{fixed}");

        assert_converged(fixed, &config);
    }
}

#[tokio::test]
async fn test_failed_generator_falls_back_to_templates() {
    init_test_logging();
    let graph = AgentGraph::new(vec![agent("weather")], vec![]);
    let template = compile_graph(&graph);

    for generator in [StubGenerator(Err("connection refused")), StubGenerator(Ok("print('hi')"))] {
        let strategy = ExternalStrategy::new(&generator);
        let mut steps: Vec<ProgressStep> = Vec::new();
        let compiled = compile_graph_with_strategy(&graph, &strategy, CompositionMode::Standard, &mut steps).await;

        assert!(compiled.generation.fell_back);
        assert_eq!(compiled.generation.method, GenerationMethod::Template);
        assert_eq!(compiled.agent_code(), template.agent_code());
        assert!(steps[1].message.ends_with("(template fallback)"));
    }
}

#[tokio::test]
async fn test_template_strategy_matches_sync_entry_point() {
    let graph = AgentGraph::new(vec![agent("weather"), mcp("m1", "@acme/weather")], vec![edge("m1")]);
    let mut steps: Vec<ProgressStep> = Vec::new();
    let compiled = compile_graph_with_strategy(&graph, &TemplateStrategy, CompositionMode::Combined, &mut steps).await;
    let sync = compile_graph_with_request(&graph, GenerationRequest::template(CompositionMode::Combined));
    assert_eq!(compiled.files, sync.files);
}

#[test]
fn test_event_handling_takes_precedence() {
    let graph = AgentGraph::new(
        vec![
            agent("weather"),
            Node::new("e", NodeKind::EventHandling, "events"),
            Node::new("m", NodeKind::Memory, "memory"),
            Node::new("l", NodeKind::Langfuse, "langfuse"),
        ],
        vec![],
    );
    let compiled = compile_graph(&graph);
    assert_eq!(compiled.generation.skeleton, Skeleton::EventHandling);

    let code = compiled.agent_code();
    assert!(code.contains("class EventType(Enum):"));
    assert!(!code.contains("def search_memory"));
    assert!(!code.contains("def track_conversation"));
    assert_eq!(compiled.generation.notes.len(), 2);
}

#[test]
fn test_combined_mode_renders_every_feature() {
    let graph = AgentGraph::new(
        vec![
            agent("weather"),
            Node::new("e", NodeKind::EventHandling, "events"),
            Node::new("m", NodeKind::Memory, "memory"),
            Node::new("l", NodeKind::Langfuse, "langfuse"),
            mcp("m1", "@acme/weather"),
        ],
        vec![],
    );
    let compiled = compile_graph_with_request(&graph, GenerationRequest::template(CompositionMode::Combined));
    let code = compiled.agent_code();

    for marker in [
        "class EventType(Enum):",
        "def search_memory",
        "def track_conversation",
        "weather_toolset = MCPToolset(",
        "def on_session_start(session_id):",
        "def on_session_end(session_id, responses):",
    ] {
        assert!(code.contains(marker), "missing {marker}");
    }
    assert!(compiled.generation.notes.is_empty());
    assert!(compiled.verification.errors.is_empty());
}

#[test]
fn test_every_skeleton_verifies_clean_and_converges() {
    let side_features = [
        vec![],
        vec![Node::new("l", NodeKind::Langfuse, "langfuse")],
        vec![Node::new("m", NodeKind::Memory, "memory")],
        vec![Node::new("e", NodeKind::EventHandling, "events").with_attr("trackAnalytics", json!(true))],
    ];

    for extra in side_features {
        for with_mcp in [false, true] {
            let mut nodes = vec![agent("weather"), Node::new("t", NodeKind::Tool, "forecast")];
            nodes.extend(extra.clone());
            if with_mcp {
                nodes.push(mcp("m1", "@acme/weather").with_attr("profileId", json!("team-1")));
            }
            let config = agc::extract(&nodes, &[]);

            for mode in [CompositionMode::Standard, CompositionMode::Combined] {
                let code = generate_with_templates(&config, GenerationRequest::template(mode)).code;
                let result = verify(&code, &config);
                assert!(result.errors.is_empty(), "{:?}/{:?}: {:#?}", mode, config.features, result.errors);
                assert!(result.warnings.is_empty());
                assert_converged(&result.fixed_code, &config);
            }
        }
    }
}

fn node_kind() -> impl Strategy<Value = NodeKind> {
    prop_oneof![
        Just(NodeKind::Agent),
        Just(NodeKind::Model),
        Just(NodeKind::Tool),
        Just(NodeKind::McpClient),
        Just(NodeKind::McpServer),
        Just(NodeKind::Langfuse),
        Just(NodeKind::Memory),
        Just(NodeKind::EventHandling),
        Just(NodeKind::Input),
        Just(NodeKind::Unknown),
    ]
}

fn graph_node() -> impl Strategy<Value = Node> {
    (
        "n[0-9]{1,2}",
        node_kind(),
        "[A-Za-z0-9 _-]{0,12}",
        proptest::option::of("@[a-z]{1,6}/[a-z][a-z0-9-]{0,10}"),
        proptest::option::of("[A-Za-z ,.]{0,60}"),
    )
        .prop_map(|(id, kind, label, package, instruction)| {
            let mut node = Node::new(id, kind, label);
            if let Some(package) = package {
                node = node.with_attr("smitheryPackage", json!(package));
            }
            if let Some(instruction) = instruction {
                node = node.with_attr("instruction", json!(instruction));
            }
            node
        })
}

fn graph() -> impl Strategy<Value = AgentGraph> {
    (
        proptest::collection::vec(graph_node(), 0..10),
        proptest::collection::vec(("n[0-9]{1,2}", "n[0-9]{1,2}"), 0..6),
    )
        .prop_map(|(nodes, pairs)| {
            let edges = pairs
                .into_iter()
                .map(|(source_id, target_id)| Edge {
                    id: String::new(),
                    source_id,
                    target_id,
                })
                .collect();
            AgentGraph::new(nodes, edges)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_any_graph_compiles_to_a_converged_agent(graph in graph()) {
        let compiled = compile_graph(&graph);
        prop_assert_eq!(compiled.files.len(), 4);
        prop_assert!(compiled.agent_code().contains("root_agent"));
        prop_assert!(compiled.verification.is_valid);
        prop_assert!(compiled.verification.errors.is_empty());

        let again = verify(compiled.agent_code(), &compiled.configuration);
        prop_assert!(again.errors.is_empty());
        prop_assert_eq!(again.fixed_code.as_str(), compiled.agent_code());
    }

    #[test]
    fn prop_mcp_declarations_are_deduplicated(packages in proptest::collection::vec("@acme/(a|b|c)", 0..8)) {
        let mut nodes = vec![agent("weather")];
        for (index, package) in packages.iter().enumerate() {
            nodes.push(mcp(&format!("m{}", index), package));
        }
        let compiled = compile_graph(&AgentGraph::new(nodes, vec![]));

        let configs = &compiled.configuration.mcp_configs;
        prop_assert!(configs.len() <= packages.len());
        let mut keys: Vec<String> = configs.iter().map(|c| c.dedup_key()).collect();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(keys.len(), configs.len());
        prop_assert_eq!(compiled.agent_code().matches("= MCPToolset(").count(), configs.len());
    }
}
