//! Generation strategies.
//!
//! Both strategies return a [`GeneratedArtifact`] under the same contract; the
//! external one degrades to templates on any failure so that every artifact
//! reaches verification.

use super::prompt;
use super::skeletons::select_skeleton;
use super::{
    generate_with_templates, CompositionMode, GeneratedArtifact, GenerationDiagnostics, GenerationMethod,
    GenerationRequest,
};
use crate::error::{AgcError, Result};
use crate::extract::UnifiedConfiguration;
use crate::settings::GeneratorSettings;
use crate::verify::scan_features;
use async_trait::async_trait;

/// Minimum trimmed length of an accepted external response
pub const DEFAULT_MIN_RESPONSE_LEN: usize = 200;

/// A black-box text generation service (usually an LLM)
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait GenerationStrategy: Send + Sync {
    fn method(&self) -> GenerationMethod;

    async fn generate(&self, config: &UnifiedConfiguration, mode: CompositionMode) -> GeneratedArtifact;
}

/// Deterministic template rendering
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateStrategy;

#[async_trait]
impl GenerationStrategy for TemplateStrategy {
    fn method(&self) -> GenerationMethod {
        GenerationMethod::Template
    }

    async fn generate(&self, config: &UnifiedConfiguration, mode: CompositionMode) -> GeneratedArtifact {
        generate_with_templates(config, GenerationRequest::template(mode))
    }
}

/// Delegates rendering to a [`TextGenerator`], falling back to templates
pub struct ExternalStrategy<'g> {
    generator: &'g dyn TextGenerator,
    min_response_len: usize,
}

impl<'g> ExternalStrategy<'g> {
    pub fn new(generator: &'g dyn TextGenerator) -> Self {
        Self {
            generator,
            min_response_len: DEFAULT_MIN_RESPONSE_LEN,
        }
    }

    /// Strategy configured from loaded generator settings
    pub fn from_settings(generator: &'g dyn TextGenerator, settings: &GeneratorSettings) -> Self {
        Self::new(generator).with_min_response_len(settings.min_response_len)
    }

    pub fn with_min_response_len(mut self, min_response_len: usize) -> Self {
        self.min_response_len = min_response_len;
        self
    }

    /// One call to the generator, validated for minimal shape
    async fn request_code(&self, config: &UnifiedConfiguration, mode: CompositionMode) -> Result<String> {
        let user_prompt = prompt::user_prompt(config, mode);
        tracing::debug!(
            "[EXTERNAL] Requesting code from {} ({} prompt bytes)",
            self.generator.name(),
            user_prompt.len()
        );

        let response = self
            .generator
            .generate(prompt::system_prompt(), &user_prompt)
            .await?;
        let code = prompt::strip_code_fences(&response);

        if code.len() < self.min_response_len {
            return Err(AgcError::InvalidResponse(format!(
                "response of {} characters is shorter than the minimum of {}",
                code.len(),
                self.min_response_len
            )));
        }
        Ok(code)
    }
}

#[async_trait]
impl GenerationStrategy for ExternalStrategy<'_> {
    fn method(&self) -> GenerationMethod {
        GenerationMethod::External
    }

    async fn generate(&self, config: &UnifiedConfiguration, mode: CompositionMode) -> GeneratedArtifact {
        match self.request_code(config, mode).await {
            Ok(code) => {
                tracing::info!(
                    "[EXTERNAL] {} produced {} characters",
                    self.generator.name(),
                    code.len()
                );
                let diagnostics = external_diagnostics(config, mode, &code);
                GeneratedArtifact { code, diagnostics }
            }
            Err(e) => {
                tracing::warn!(
                    "[EXTERNAL] {} failed, falling back to templates: {}",
                    self.generator.name(),
                    e
                );
                let mut artifact = generate_with_templates(config, GenerationRequest::template(mode));
                artifact.diagnostics.fell_back = true;
                artifact
                    .diagnostics
                    .notes
                    .push(format!("External generation failed ({}); template output used", e));
                artifact
            }
        }
    }
}

/// Diagnostics describing what the external code renders, not what the
/// templates would have rendered
fn external_diagnostics(config: &UnifiedConfiguration, mode: CompositionMode, code: &str) -> GenerationDiagnostics {
    let skeleton = select_skeleton(config, mode);
    let scan = scan_features(code, config);

    let mut notes = Vec::new();
    for feature in &scan.missing {
        if prompt::requests_feature(config, mode, feature) {
            notes.push(format!("{} was requested but the external output does not render it", feature));
        } else {
            notes.push(format!(
                "{} is enabled but not rendered by the {} skeleton; use combined mode to include it",
                feature,
                skeleton.as_str()
            ));
        }
    }
    let expected = config.enabled_mcp().count();
    if scan.toolsets < expected {
        notes.push(format!("External output defines {} of {} MCP toolsets", scan.toolsets, expected));
    }
    if !config.is_valid {
        notes.push("Configuration is invalid; generated from defaults".to_string());
    }

    GenerationDiagnostics {
        method: GenerationMethod::External,
        skeleton,
        toolset_count: scan.toolsets,
        fell_back: false,
        notes,
    }
}
