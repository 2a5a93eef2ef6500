//! # MCP Argument Canonicalization
//!
//! Shared by the extractor (building args for a node), the code generator
//! (rendering toolset blocks) and the verifier (repairing stale args lists).
//!
//! Canonical form of a Smithery-style invocation:
//!
//! ```text
//! -y @smithery/cli@latest run <package> --key <credential> [--profile <id>]
//! ```
//!
//! The credential is always a placeholder naming a variable that is loaded from
//! the environment, never a literal secret.

/// CLI package used to launch Smithery-hosted MCP servers
pub const SMITHERY_CLI: &str = "@smithery/cli@latest";
/// Marker after which the target package is expected
pub const RUN_MARKER: &str = "run";
pub const AUTH_FLAG: &str = "--key";
pub const PROFILE_FLAG: &str = "--profile";
/// Environment variable holding the Smithery key unless a node names another
pub const DEFAULT_CREDENTIAL_ENV: &str = "SMITHERY_API_KEY";
pub const DEFAULT_COMMAND: &str = "npx";

fn is_flag(token: &str) -> bool {
    token.starts_with('-')
}

/// Tokens that can occupy a flag's value slot
fn is_value(token: &str) -> bool {
    !is_flag(token) && token != RUN_MARKER
}

/// Python variable name that carries the credential named by `env_name`
pub fn credential_variable(env_name: &str) -> String {
    let mut ident: String = env_name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert_str(0, "key_");
    }
    ident
}

/// Invocation used when a node supplies no args at all
pub fn synthesize_args(package: &str) -> Vec<String> {
    vec![
        "-y".to_string(),
        SMITHERY_CLI.to_string(),
        RUN_MARKER.to_string(),
        package.to_string(),
    ]
}

/// Bring `args` into canonical form for `package`.
///
/// - A `run` marker followed by a stale token has that token replaced by
///   `package`; a marker with nothing usable after it gets `package` inserted.
/// - Exactly one `--key <credential>` pair remains. A dangling flag is completed
///   in place, any inline value is replaced by the placeholder, and later
///   duplicates are removed.
/// - `--profile <id>` is appended when a profile is given and none is present.
///
/// Applying this twice gives the same result as applying it once.
pub fn canonicalize_args(
    args: &[String],
    package: &str,
    credential: &str,
    profile: Option<&str>,
) -> Vec<String> {
    let mut out = args.to_vec();

    if let Some(run) = out.iter().position(|token| token == RUN_MARKER) {
        match out.get(run + 1) {
            Some(next) if next == package => {}
            Some(next) if !is_flag(next) => out[run + 1] = package.to_string(),
            _ => out.insert(run + 1, package.to_string()),
        }
    }

    let auth_positions: Vec<usize> = out
        .iter()
        .enumerate()
        .filter(|(_, token)| *token == AUTH_FLAG)
        .map(|(index, _)| index)
        .collect();

    match auth_positions.first() {
        None => {
            out.push(AUTH_FLAG.to_string());
            out.push(credential.to_string());
        }
        Some(&first) => {
            for &pos in auth_positions[1..].iter().rev() {
                let has_value = out.get(pos + 1).is_some_and(|token| is_value(token));
                let end = if has_value { pos + 2 } else { pos + 1 };
                out.drain(pos..end);
            }
            match out.get(first + 1) {
                Some(value) if is_value(value) => out[first + 1] = credential.to_string(),
                _ => out.insert(first + 1, credential.to_string()),
            }
        }
    }

    if let Some(profile) = profile.map(str::trim).filter(|p| !p.is_empty()) {
        if !out.iter().any(|token| token == PROFILE_FLAG) {
            out.push(PROFILE_FLAG.to_string());
            out.push(profile.to_string());
        }
    }

    out
}

/// Package reference implied by an args list, if any.
///
/// Prefers the token after `run`; otherwise the first positional token that is
/// neither the Smithery CLI nor the value of a known flag.
pub fn package_from_args(args: &[String]) -> Option<String> {
    if let Some(run) = args.iter().position(|token| token == RUN_MARKER) {
        return args
            .get(run + 1)
            .filter(|token| is_value(token))
            .cloned();
    }

    let mut skip_next = false;
    for token in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if token == AUTH_FLAG || token == PROFILE_FLAG {
            skip_next = true;
            continue;
        }
        if is_flag(token) || token.starts_with("@smithery/cli") {
            continue;
        }
        return Some(token.clone());
    }
    None
}

/// Profile id carried by an args list
pub fn profile_from_args(args: &[String]) -> Option<String> {
    let pos = args.iter().position(|token| token == PROFILE_FLAG)?;
    args.get(pos + 1).filter(|token| is_value(token)).cloned()
}
