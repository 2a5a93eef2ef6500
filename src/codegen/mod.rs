//! # Agent Code Generation
//!
//! Python (Google ADK) code generation for agent configurations.
//!
//! The template path picks one skeleton by feature precedence and embeds the
//! MCP toolsets into it. The external path hands the same configuration to a
//! [`TextGenerator`] and falls back to the template path on failure.

mod http_generator;
mod node_handlers;
mod prompt;
mod python_codegen;
mod skeletons;
mod strategy;

pub use http_generator::HttpTextGenerator;
pub use node_handlers::{build_toolsets, credential_bindings, render_args_list, toolset_identifier, ToolsetBlock};
pub use prompt::{strip_code_fences, system_prompt, user_prompt};
pub use python_codegen::{render_canonical_agent, AgentCodeGenerator};
pub use skeletons::{select_skeleton, unrendered_features, Skeleton};
pub use strategy::{
    ExternalStrategy, GenerationStrategy, TemplateStrategy, TextGenerator, DEFAULT_MIN_RESPONSE_LEN,
};

use crate::extract::UnifiedConfiguration;
use crate::settings::GeneratorSettings;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMethod {
    #[default]
    Template,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositionMode {
    /// One primary skeleton chosen by precedence
    #[default]
    Standard,
    /// Every enabled side feature in a single superset skeleton
    Combined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GenerationRequest {
    pub method: GenerationMethod,
    pub mode: CompositionMode,
}

impl GenerationRequest {
    pub fn template(mode: CompositionMode) -> Self {
        Self {
            method: GenerationMethod::Template,
            mode,
        }
    }

    pub fn external(mode: CompositionMode) -> Self {
        Self {
            method: GenerationMethod::External,
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationDiagnostics {
    /// Method that produced the code
    pub method: GenerationMethod,
    pub skeleton: Skeleton,
    pub toolset_count: usize,
    /// External generation was requested but templates were used
    pub fell_back: bool,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedArtifact {
    pub code: String,
    pub diagnostics: GenerationDiagnostics,
}

/// Render `config` with the template engine
pub fn generate_with_templates(config: &UnifiedConfiguration, request: GenerationRequest) -> GeneratedArtifact {
    let skeleton = select_skeleton(config, request.mode);
    let generator = AgentCodeGenerator::new(config, skeleton);
    let code = generator.generate_program();

    let mut notes = Vec::new();
    for feature in unrendered_features(config, skeleton) {
        notes.push(format!(
            "{} is enabled but not rendered by the {} skeleton; use combined mode to include it",
            feature,
            skeleton.as_str()
        ));
    }
    if !config.is_valid {
        notes.push("Configuration is invalid; generated from defaults".to_string());
    }

    tracing::info!(
        "[CODEGEN] Generated {} skeleton ({} toolsets, {} bytes)",
        skeleton.as_str(),
        generator.toolsets().len(),
        code.len()
    );

    GeneratedArtifact {
        code,
        diagnostics: GenerationDiagnostics {
            method: GenerationMethod::Template,
            skeleton,
            toolset_count: generator.toolsets().len(),
            fell_back: false,
            notes,
        },
    }
}

/// Generation without an external service.
///
/// An external request is served by the template engine and flagged as a
/// fallback.
pub fn generate_offline(config: &UnifiedConfiguration, request: GenerationRequest) -> GeneratedArtifact {
    match request.method {
        GenerationMethod::Template => generate_with_templates(config, request),
        GenerationMethod::External => {
            tracing::warn!("[CODEGEN] External generation requested without a generator; using templates");
            let mut artifact = generate_with_templates(config, request);
            artifact.diagnostics.fell_back = true;
            artifact
                .diagnostics
                .notes
                .push("No external generator configured; template output used".to_string());
            artifact
        }
    }
}

/// Single generation entry point; `generator` serves external requests under
/// the thresholds in `settings`
pub async fn generate(
    config: &UnifiedConfiguration,
    request: GenerationRequest,
    generator: Option<&dyn TextGenerator>,
    settings: &GeneratorSettings,
) -> GeneratedArtifact {
    match (request.method, generator) {
        (GenerationMethod::External, Some(generator)) => {
            ExternalStrategy::from_settings(generator, settings)
                .generate(config, request.mode)
                .await
        }
        _ => generate_offline(config, request),
    }
}
