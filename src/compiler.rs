//! # Agent Compiler
//!
//! Main entry points for compiling agent graphs to verified Python agent
//! packages.

use crate::codegen::{
    generate_offline, CompositionMode, GeneratedArtifact, GenerationDiagnostics, GenerationRequest,
    GenerationStrategy,
};
use crate::extract::{extract_graph, UnifiedConfiguration};
use crate::graph::AgentGraph;
use crate::progress::{self, ProgressReporter, ProgressStep, Tee};
use crate::verify::{self, companion, VerificationResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Everything produced for one graph
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledAgent {
    pub configuration: UnifiedConfiguration,
    pub generation: GenerationDiagnostics,
    pub verification: VerificationResult,
    /// `agent.py`, `__init__.py`, `requirements.txt`, `.env.example`
    pub files: BTreeMap<String, String>,
    pub progress: Vec<ProgressStep>,
}

impl CompiledAgent {
    /// The verified agent source
    pub fn agent_code(&self) -> &str {
        &self.verification.fixed_code
    }

    /// The configuration is valid and verification left nothing unresolved
    pub fn is_valid(&self) -> bool {
        self.configuration.is_valid && self.verification.is_valid
    }
}

/// Compile an agent graph to a Python agent package
///
/// This is the main entry point for the agent compiler. It renders the graph
/// with the template engine in standard mode and verifies the result.
///
/// Compilation never fails: an invalid graph still yields a runnable default
/// agent, with the problems listed in `configuration.errors`.
///
/// # Examples
///
/// ```rust,no_run
/// use agc::{compile_graph, AgentGraph};
///
/// let graph = AgentGraph::from_json(r#"{"nodes": [], "edges": []}"#)?;
/// let compiled = compile_graph(&graph);
/// for (name, content) in &compiled.files {
///     std::fs::write(name, content)?;
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn compile_graph(graph: &AgentGraph) -> CompiledAgent {
    compile_graph_with_request(graph, GenerationRequest::default())
}

/// Compile an agent graph with an explicit generation request
///
/// # Arguments
///
/// * `graph` - The agent graph to compile
/// * `request` - Generation method and composition mode. An external request
///   is served by templates here and marked as a fallback; use
///   [`compile_graph_with_strategy`] to plug in a generator.
pub fn compile_graph_with_request(graph: &AgentGraph, request: GenerationRequest) -> CompiledAgent {
    let mut steps: Vec<ProgressStep> = Vec::new();
    let configuration = extract_phase(graph, &mut steps);

    tracing::info!("[AGC] Phase 2: Generating code...");
    let artifact = generate_offline(&configuration, request);
    finish(configuration, artifact, steps)
}

/// Compile an agent graph with any generation strategy
///
/// # Arguments
///
/// * `graph` - The agent graph to compile
/// * `strategy` - Template or external strategy; external strategies fall back
///   to templates on failure
/// * `mode` - Standard (one primary skeleton) or combined
/// * `reporter` - Receives each progress step as it happens
pub async fn compile_graph_with_strategy(
    graph: &AgentGraph,
    strategy: &dyn GenerationStrategy,
    mode: CompositionMode,
    reporter: &mut dyn ProgressReporter,
) -> CompiledAgent {
    let mut steps: Vec<ProgressStep> = Vec::new();
    let mut tee = Tee {
        first: &mut steps,
        second: reporter,
    };
    let configuration = extract_phase(graph, &mut tee);

    tracing::info!("[AGC] Phase 2: Generating code ({:?})...", strategy.method());
    let artifact = strategy.generate(&configuration, mode).await;
    tee.report(ProgressStep::new(progress::GENERATE, generate_message(&artifact)));

    let compiled = verify_phase(configuration, artifact, &mut tee);
    CompiledAgent { progress: steps, ..compiled }
}

fn extract_phase(graph: &AgentGraph, reporter: &mut dyn ProgressReporter) -> UnifiedConfiguration {
    tracing::info!("[AGC] Starting agent compilation");
    tracing::info!("[AGC] Graph: {} nodes, {} edges", graph.nodes.len(), graph.edges.len());

    tracing::info!("[AGC] Phase 1: Extracting configuration...");
    let configuration = extract_graph(graph);
    tracing::info!(
        "[AGC]   - {} ({} complexity, features: [{}])",
        configuration.agent_name,
        configuration.complexity.as_str(),
        configuration.features.join(", ")
    );

    reporter.report(ProgressStep::new(
        progress::EXTRACT,
        format!(
            "Extracted {} with {} error(s) and {} warning(s)",
            configuration.agent_name,
            configuration.errors.len(),
            configuration.warnings.len()
        ),
    ));
    configuration
}

fn generate_message(artifact: &GeneratedArtifact) -> String {
    let diagnostics = &artifact.diagnostics;
    let mut message = format!(
        "Generated {} skeleton with {} toolset(s)",
        diagnostics.skeleton.as_str(),
        diagnostics.toolset_count
    );
    if diagnostics.fell_back {
        message.push_str(" (template fallback)");
    }
    message
}

/// Report generation, then verify; `steps` already holds the extract step
fn finish(
    configuration: UnifiedConfiguration,
    artifact: GeneratedArtifact,
    mut steps: Vec<ProgressStep>,
) -> CompiledAgent {
    steps.report(ProgressStep::new(progress::GENERATE, generate_message(&artifact)));
    let compiled = verify_phase(configuration, artifact, &mut steps);
    CompiledAgent { progress: steps, ..compiled }
}

/// Verify, attach companion files and report the remaining steps.
///
/// The returned `progress` is empty; callers fill it from their own log.
fn verify_phase(
    configuration: UnifiedConfiguration,
    artifact: GeneratedArtifact,
    reporter: &mut dyn ProgressReporter,
) -> CompiledAgent {
    tracing::info!("[AGC] Phase 3: Verifying generated code...");
    let verification = verify::verify(&artifact.code, &configuration);
    reporter.report(ProgressStep::new(
        progress::VERIFY,
        format!(
            "Verified with {} finding(s), {} fixed",
            verification.errors.len(),
            verification.fixed_count()
        ),
    ));

    tracing::info!("[AGC] Phase 4: Writing companion files...");
    let files = companion::files(&verification.fixed_code, &configuration);
    reporter.report(ProgressStep::new(
        progress::COMPANION_FILES,
        format!("Prepared {} files", files.len()),
    ));

    let valid = configuration.is_valid && verification.is_valid;
    reporter.report(ProgressStep::new(
        progress::COMPLETE,
        if valid {
            "Compilation complete".to_string()
        } else {
            "Compilation complete with unresolved problems".to_string()
        },
    ));
    tracing::info!(
        "[AGC] Compilation complete ({} bytes, quality {})",
        verification.fixed_code.len(),
        verification.quality.score
    );

    CompiledAgent {
        configuration,
        generation: artifact.diagnostics,
        verification,
        files,
        progress: Vec::new(),
    }
}
