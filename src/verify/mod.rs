//! # Verification & Auto-Fix
//!
//! Audits generated agent code against the ordered [`RULES`] registry and
//! repairs what it finds.
//!
//! ## Pass structure
//!
//! 1. Every rule runs once, in registry order, on the code left by the rules
//!    before it. A detection produces a [`Finding`]; the rule's fix is applied
//!    immediately. There is no re-scan.
//! 2. Finalization appends `__all__ = ["root_agent"]` when the export
//!    declaration is missing (a warning, not a finding).
//! 3. The result is scored (informational) and the companion files are
//!    synthesized from the configuration.
//!
//! Verification does no I/O and always terminates: the registry is fixed and
//! each fix is bounded.

pub mod companion;
mod pysrc;
mod quality;
mod rules;

pub use quality::{scan_features, FeatureScan, Grade, QualityReport};
pub use rules::{rule, Detector, Fix, FixStrategy, Patcher, Rule, Severity, RULES};

use crate::extract::UnifiedConfiguration;
use pysrc::{cached, Source};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const EXPORT_DECLARATION: &str = "__all__ = [\"root_agent\"]";

/// One detected defect and what was done about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Rule id
    pub kind: String,
    pub severity: Severity,
    pub message: String,
    pub strategy: FixStrategy,
    /// The fix changed the code
    pub fixed: bool,
    pub original_snippet: String,
    pub fixed_snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// No finding was left unfixed
    pub is_valid: bool,
    /// Findings in detection order, fixed ones included
    pub errors: Vec<Finding>,
    pub fixed_code: String,
    pub warnings: Vec<String>,
    /// `__init__.py`, `requirements.txt` and `.env.example`
    pub additional_files: BTreeMap<String, String>,
    pub quality: QualityReport,
}

impl VerificationResult {
    pub fn unresolved(&self) -> impl Iterator<Item = &Finding> {
        self.errors.iter().filter(|finding| !finding.fixed)
    }

    pub fn fixed_count(&self) -> usize {
        self.errors.iter().filter(|finding| finding.fixed).count()
    }
}

/// Run the rule registry over `code`
pub fn verify(code: &str, config: &UnifiedConfiguration) -> VerificationResult {
    tracing::info!("[VERIFY] Checking {} bytes against {} rules", code.len(), RULES.len());

    let mut current = code.to_string();
    let mut findings = Vec::new();

    for rule in RULES {
        if !(rule.detect)(&current, config) {
            continue;
        }

        let updated = rule.apply(&current, config);
        let fixed = updated != current;
        let (original_snippet, fixed_snippet) = match rule.strategy() {
            FixStrategy::Resynthesize => (current.clone(), updated.clone()),
            FixStrategy::Patch => pysrc::changed_region(&current, &updated),
        };

        if fixed {
            tracing::info!("[VERIFY] {} fixed ({:?})", rule.id, rule.strategy());
        } else {
            tracing::warn!("[VERIFY] {} detected but not fixed", rule.id);
        }

        findings.push(Finding {
            kind: rule.id.to_string(),
            severity: rule.severity,
            message: rule.description.to_string(),
            strategy: rule.strategy(),
            fixed,
            original_snippet,
            fixed_snippet,
        });
        current = updated;
    }

    let mut warnings = Vec::new();
    if !has_export_declaration(&current) {
        if !current.ends_with('\n') {
            current.push('\n');
        }
        current.push_str("\n\n");
        current.push_str(EXPORT_DECLARATION);
        current.push('\n');
        warnings.push("Export declaration was missing; appended __all__ = [\"root_agent\"]".to_string());
    }

    let unresolved = findings.iter().filter(|finding: &&Finding| !finding.fixed).count();
    let quality = quality::score(&current, config, unresolved);
    let additional_files = companion::additional_files(config);

    tracing::info!(
        "[VERIFY] {} findings ({} unresolved), quality {} ({:?})",
        findings.len(),
        unresolved,
        quality.score,
        quality.grade
    );

    VerificationResult {
        is_valid: unresolved == 0,
        errors: findings,
        fixed_code: current,
        warnings,
        additional_files,
        quality,
    }
}

fn has_export_declaration(code: &str) -> bool {
    static EXPORTS: OnceLock<Regex> = OnceLock::new();
    let exports = cached(&EXPORTS, r#"(?m)^__all__[ \t]*=[ \t]*\[[^\]]*["']root_agent["']"#);
    !Source::new(code).find_code(exports).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{generate_with_templates, CompositionMode, GenerationRequest};
    use crate::extract::extract;
    use crate::graph::{Node, NodeKind};
    use serde_json::json;

    fn full_config() -> UnifiedConfiguration {
        extract(
            &[
                Node::new("a", NodeKind::Agent, "concierge")
                    .with_attr("instruction", json!("Plan trips and keep track of the details.")),
                Node::new("m", NodeKind::McpClient, "")
                    .with_attr("smitheryPackage", json!("@acme/travel"))
                    .with_attr("profileId", json!("p-123")),
                Node::new("t", NodeKind::Tool, "lookup").with_attr("toolType", json!("custom")),
                Node::new("l", NodeKind::Langfuse, "lf"),
                Node::new("mem", NodeKind::Memory, "mem"),
                Node::new("e", NodeKind::EventHandling, "events"),
            ],
            &[],
        )
    }

    #[test]
    fn test_template_output_is_clean_for_every_skeleton() {
        let config = full_config();
        for mode in [CompositionMode::Standard, CompositionMode::Combined] {
            let code = generate_with_templates(&config, GenerationRequest::template(mode)).code;
            let result = verify(&code, &config);
            assert!(result.errors.is_empty(), "{:?}: {:#?}", mode, result.errors);
            assert!(result.warnings.is_empty());
            assert_eq!(result.fixed_code, code);
        }
    }

    #[test]
    fn test_second_pass_is_quiet() {
        let config = extract(&[Node::new("a", NodeKind::Agent, "helper")], &[]);
        let broken = "from google.adk.agents import Agent\n\nhelper = Agent(instructions=\"Be helpful\", name=\"helper\", tools=google_search)\nprint(helper.run(\"hi\"))\n";

        let first = verify(broken, &config);
        assert!(first.fixed_count() > 0);
        assert_eq!(first.warnings.len(), 1);

        let second = verify(&first.fixed_code, &config);
        assert!(second.errors.iter().all(|f| !f.fixed), "{:#?}", second.errors);
        assert!(second.warnings.is_empty());
        assert_eq!(second.fixed_code, first.fixed_code);
    }

    #[test]
    fn test_placeholder_duplicate_is_folded_in_the_same_pass() {
        let config = extract(
            &[
                Node::new("a", NodeKind::Agent, "helper"),
                Node::new("m", NodeKind::McpClient, "").with_attr("smitheryPackage", json!("@acme/tasks")),
            ],
            &[],
        );
        let toolset = |identifier: &str, package: &str| {
            format!(
                "{identifier} = MCPToolset(\n    connection_params=StdioConnectionParams(\n        server_params=StdioServerParameters(\n            command=\"npx\",\n            args=[\"run\", \"{package}\"]\n        )\n    )\n)\n"
            )
        };
        let code = format!(
            "from google.adk.agents import LlmAgent\n\n{}\n{}\nroot_agent = LlmAgent(name=\"helper\", tools=[tasks_toolset, other_toolset])\n",
            toolset("tasks_toolset", "@acme/tasks"),
            toolset("other_toolset", "your-package-here")
        );

        let first = verify(&code, &config);
        let kinds: Vec<&str> = first.errors.iter().map(|f| f.kind.as_str()).collect();
        assert!(kinds.contains(&"duplicate_toolset_definition"), "{:?}", kinds);
        assert_eq!(first.fixed_code.matches("= MCPToolset(").count(), 1);

        let second = verify(&first.fixed_code, &config);
        assert_eq!(second.fixed_count(), 0, "{:#?}", second.errors);
        assert_eq!(second.fixed_code, first.fixed_code);
    }

    #[test]
    fn test_resynthesis_replaces_whole_file() {
        let config = extract(&[Node::new("a", NodeKind::Agent, "helper")], &[]);
        let result = verify("class Helper(LlmAgent):\n    pass\n", &config);
        assert_eq!(result.errors[0].kind, "agent_subclass");
        assert_eq!(result.errors[0].strategy, FixStrategy::Resynthesize);
        assert_eq!(result.errors[0].original_snippet, "class Helper(LlmAgent):\n    pass\n");
        assert!(result.fixed_code.contains("root_agent = LlmAgent("));
        assert!(result.is_valid);
    }

    #[test]
    fn test_snippets_cover_changed_lines_only() {
        let config = UnifiedConfiguration::default();
        let code = "import os\nfrom dotenv import load_dotenv\n\nload_dotenv()\nAPI_KEY = \"sk-abc\"\n";
        let result = verify(code, &config);
        let secret = result.errors.iter().find(|f| f.kind == "hardcoded_secret").unwrap();
        assert_eq!(secret.original_snippet, "API_KEY = \"sk-abc\"");
        assert_eq!(secret.fixed_snippet, "API_KEY = os.getenv(\"API_KEY\")");
    }

    #[test]
    fn test_export_declaration_is_appended_once() {
        let config = UnifiedConfiguration::default();
        let code = generate_with_templates(&config, GenerationRequest::default()).code;
        let stripped = code.replace("__all__ = [\"root_agent\"]\n", "");

        let result = verify(&stripped, &config);
        assert!(result.errors.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.fixed_code.matches("__all__").count(), 1);
    }

    #[test]
    fn test_additional_files_are_attached() {
        let config = UnifiedConfiguration::default();
        let result = verify("x = 1\n", &config);
        assert_eq!(result.additional_files.len(), 3);
        assert!(result.additional_files.contains_key(companion::INIT_FILE));
    }
}
