//! Identifier and literal helpers for emitting Python source.

const PYTHON_KEYWORDS: &[&str] = &[
    "false", "none", "true", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield", "match", "case",
];

/// Lowercase, identifier-safe form of `raw`, or `None` when nothing usable remains
pub fn sanitize_identifier(raw: &str) -> Option<String> {
    let mut ident = String::with_capacity(raw.len());
    let mut last_underscore = true;

    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            ident.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            ident.push('_');
            last_underscore = true;
        }
    }

    while ident.ends_with('_') {
        ident.pop();
    }

    if ident.is_empty() {
        return None;
    }
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert_str(0, "agent_");
    }
    if PYTHON_KEYWORDS.contains(&ident.as_str()) {
        ident.push_str("_agent");
    }
    Some(ident)
}

/// Double-quoted Python string literal
pub fn python_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Triple-quoted Python string literal that keeps line breaks readable
pub fn python_triple_quoted(value: &str) -> String {
    let mut body = value.replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"");
    if body.ends_with('"') {
        body.insert(body.len() - 1, '\\');
    }
    format!("\"\"\"{}\"\"\"", body)
}
