//! # Agent Graph Compiler (AGC)
//!
//! Compiler for transforming visual agent graphs into verified Python agent
//! packages built on Google ADK.
//!
//! AGC takes the editor's node-and-edge graph and produces:
//! - `agent.py` with a `root_agent` and an async entry point
//! - MCP toolsets wired into the agent's tool list, credentials read from the
//!   environment
//! - Optional Langfuse analytics, Mem0 memory and lifecycle event scaffolding
//! - `__init__.py`, `requirements.txt` and `.env.example`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agc::{compile_graph, AgentGraph};
//!
//! let json = std::fs::read_to_string("agent_graph.json")?;
//! let graph = AgentGraph::from_json(&json)?;
//!
//! let compiled = compile_graph(&graph);
//! for error in &compiled.configuration.errors {
//!     eprintln!("graph error: {}", error);
//! }
//! std::fs::write("agent.py", compiled.agent_code())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! AGC follows a multi-phase compilation pipeline:
//!
//! 1. **Extraction** - Normalize the graph into a [`UnifiedConfiguration`]
//!    (defaults, validation, MCP deduplication)
//! 2. **Code Generation** - Render one skeleton by feature precedence (or the
//!    combined skeleton), optionally through an external [`TextGenerator`]
//! 3. **Verification** - Run the ordered defect rule registry, patching or
//!    regenerating the code
//! 4. **Companion Files** - Package initializer, dependency manifest and
//!    environment template

pub mod codegen;
pub mod compiler;
pub mod error;
pub mod extract;
pub mod graph;
pub mod mcp;
pub mod progress;
pub mod settings;
pub mod verify;

// Re-export the main compilation API
pub use compiler::{compile_graph, compile_graph_with_request, compile_graph_with_strategy, CompiledAgent};

pub use codegen::{
    generate, CompositionMode, ExternalStrategy, GenerationMethod, GenerationRequest, GenerationStrategy,
    HttpTextGenerator, TemplateStrategy, TextGenerator,
};
pub use error::{AgcError, Result};
pub use extract::{extract, extract_graph, UnifiedConfiguration};
pub use graph::{AgentGraph, Edge, Node, NodeKind};
pub use progress::{ProgressReporter, ProgressStep, TracingReporter};
pub use settings::GeneratorSettings;
pub use verify::{verify, Finding, VerificationResult};
