//! Lightweight Python source inspection.
//!
//! Not a parser: string literals and comments are masked so that pattern
//! matches can be restricted to code, and bracket matching and argument
//! splitting skip masked text.

use regex::{Match, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Compile `pattern` once into `cell`
pub fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("valid regex"))
}

/// Source text with its string literal and comment spans
pub struct Source<'a> {
    text: &'a str,
    masked: Vec<(usize, usize)>,
}

/// One top-level argument of a call, as a byte range into the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arg {
    pub start: usize,
    pub end: usize,
}

/// A call `name(...)`; `open`/`close` are the paren positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub start: usize,
    pub open: usize,
    pub close: usize,
}

/// Item of a list literal: decoded string, or raw expression text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub text: String,
    pub bare: bool,
}

/// Function definition enclosing a position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefSite {
    pub line_start: usize,
    pub indent: usize,
    pub is_async: bool,
    pub name: String,
}

impl<'a> Source<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            masked: scan_masked(text),
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Whether `pos` lies outside every string literal and comment
    pub fn is_code(&self, pos: usize) -> bool {
        let idx = self.masked.partition_point(|span| span.0 <= pos);
        idx == 0 || self.masked[idx - 1].1 <= pos
    }

    /// Matches of `re` that start in code
    pub fn find_code(&self, re: &Regex) -> Vec<Match<'a>> {
        re.find_iter(self.text)
            .filter(|m| self.is_code(m.start()))
            .collect()
    }

    /// Capture sets of `re` whose whole match starts in code
    pub fn captures_code(&self, re: &Regex) -> Vec<regex::Captures<'a>> {
        re.captures_iter(self.text)
            .filter(|caps| caps.get(0).is_some_and(|m| self.is_code(m.start())))
            .collect()
    }

    /// Position of the bracket closing the one at `open`
    pub fn matching_bracket(&self, open: usize) -> Option<usize> {
        let bytes = self.text.as_bytes();
        let mut depth = 0usize;
        for (pos, &byte) in bytes.iter().enumerate().skip(open) {
            if !self.is_code(pos) {
                continue;
            }
            match byte {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(pos);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Calls whose callee matches `callee` (a regex ending right before `(`)
    pub fn calls(&self, callee: &Regex) -> Vec<Call> {
        self.find_code(callee)
            .into_iter()
            .filter_map(|m| {
                let open = m.end();
                if self.text.as_bytes().get(open) != Some(&b'(') {
                    return None;
                }
                let close = self.matching_bracket(open)?;
                Some(Call {
                    start: m.start(),
                    open,
                    close,
                })
            })
            .collect()
    }

    /// Top-level comma separated items between `open` and `close`
    pub fn split_args(&self, open: usize, close: usize) -> Vec<Arg> {
        let bytes = self.text.as_bytes();
        let mut args = Vec::new();
        let mut depth = 0usize;
        let mut start = open + 1;

        for pos in open + 1..=close {
            let at_end = pos == close;
            if !at_end && !self.is_code(pos) {
                continue;
            }
            match bytes[pos] {
                b'(' | b'[' | b'{' if !at_end => depth += 1,
                b')' | b']' | b'}' if !at_end => depth = depth.saturating_sub(1),
                b',' if depth == 0 && !at_end => {
                    push_trimmed(self.text, start, pos, &mut args);
                    start = pos + 1;
                }
                _ if at_end => push_trimmed(self.text, start, pos, &mut args),
                _ => {}
            }
        }
        args
    }

    pub fn arg_text(&self, arg: Arg) -> &'a str {
        &self.text[arg.start..arg.end]
    }

    /// `(name, value)` ranges when `arg` is a keyword argument
    pub fn kwarg(&self, arg: Arg) -> Option<(Arg, Arg)> {
        let bytes = self.text.as_bytes();
        let mut depth = 0usize;
        for pos in arg.start..arg.end {
            if !self.is_code(pos) {
                continue;
            }
            match bytes[pos] {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth = depth.saturating_sub(1),
                b'=' if depth == 0 => {
                    let prev = pos.checked_sub(1).map(|p| bytes[p]);
                    let next = bytes.get(pos + 1).copied();
                    if matches!(prev, Some(b'=' | b'!' | b'<' | b'>')) || next == Some(b'=') {
                        return None;
                    }
                    let name = self.text[arg.start..pos].trim_end();
                    if !is_identifier(name) {
                        return None;
                    }
                    let value_start = pos + 1 + (self.text[pos + 1..arg.end].len()
                        - self.text[pos + 1..arg.end].trim_start().len());
                    return Some((
                        Arg { start: arg.start, end: arg.start + name.len() },
                        Arg { start: value_start, end: arg.end },
                    ));
                }
                _ => {}
            }
        }
        None
    }

    /// Keyword argument `name` of a call
    pub fn find_kwarg(&self, call: Call, name: &str) -> Option<(Arg, Arg)> {
        self.split_args(call.open, call.close)
            .into_iter()
            .filter_map(|arg| self.kwarg(arg))
            .find(|(key, _)| self.arg_text(*key) == name)
    }

    /// Items of the list literal spanning `open..=close`
    pub fn list_items(&self, open: usize, close: usize) -> Vec<ListItem> {
        self.split_args(open, close)
            .into_iter()
            .map(|arg| {
                let raw = self.arg_text(arg);
                match decode_string_literal(raw) {
                    Some(text) => ListItem { text, bare: false },
                    None => ListItem { text: raw.to_string(), bare: true },
                }
            })
            .collect()
    }

    /// Names bound at any level by imports, definitions or assignments
    pub fn bound_names(&self) -> HashSet<String> {
        static IMPORT: OnceLock<Regex> = OnceLock::new();
        static FROM_IMPORT: OnceLock<Regex> = OnceLock::new();
        static DEFINITION: OnceLock<Regex> = OnceLock::new();
        static ASSIGNMENT: OnceLock<Regex> = OnceLock::new();

        let mut names = HashSet::new();

        for caps in self.captures_code(cached(&IMPORT, r"(?m)^[ \t]*import[ \t]+([^\n#]+)")) {
            for item in caps[1].split(',') {
                let item = item.trim();
                let bound = match item.split_once(" as ") {
                    Some((_, alias)) => alias.trim(),
                    None => item.split('.').next().unwrap_or(item),
                };
                names.insert(bound.to_string());
            }
        }

        let from_import = cached(&FROM_IMPORT, r"(?m)^[ \t]*from[ \t]+[\w.]+[ \t]+import[ \t]+(\(?)");
        for m in self.find_code(from_import) {
            let list_start = m.end();
            let list = if m.as_str().ends_with('(') {
                let open = list_start - 1;
                match self.matching_bracket(open) {
                    Some(close) => &self.text[list_start..close],
                    None => &self.text[list_start..line_end(self.text, list_start)],
                }
            } else {
                &self.text[list_start..line_end(self.text, list_start)]
            };
            for item in list.split('#').next().unwrap_or("").split(',') {
                let item = item.trim();
                let bound = item.split_once(" as ").map(|(_, alias)| alias.trim()).unwrap_or(item);
                if is_identifier(bound) {
                    names.insert(bound.to_string());
                }
            }
        }

        let definition = cached(&DEFINITION, r"(?m)^[ \t]*(?:async[ \t]+)?(?:def|class)[ \t]+(\w+)");
        for caps in self.captures_code(definition) {
            names.insert(caps[1].to_string());
        }

        let assignment = cached(&ASSIGNMENT, r"(?m)^[ \t]*(\w+)[ \t]*(?::[^=\n]+)?=[^=]");
        for caps in self.captures_code(assignment) {
            names.insert(caps[1].to_string());
        }

        names
    }

    /// The `def` whose body contains `pos`
    pub fn enclosing_def(&self, pos: usize) -> Option<DefSite> {
        let mut current_indent = indent_width(self.text, line_start(self.text, pos));
        let mut cursor = line_start(self.text, pos);

        while cursor > 0 {
            let start = line_start(self.text, cursor - 1);
            cursor = start;
            let line = &self.text[start..line_end(self.text, start)];
            let trimmed = line.trim_start();
            let indent = line.len() - trimmed.len();
            if trimmed.is_empty() || trimmed.starts_with('#') || !self.is_code(start + indent) {
                continue;
            }
            if indent >= current_indent {
                continue;
            }

            let (is_async, rest) = match trimmed.strip_prefix("async ") {
                Some(rest) => (true, rest.trim_start()),
                None => (false, trimmed),
            };
            if let Some(signature) = rest.strip_prefix("def ") {
                let name: String = signature
                    .trim_start()
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                    .collect();
                return Some(DefSite {
                    line_start: start,
                    indent,
                    is_async,
                    name,
                });
            }
            if indent == 0 {
                return None;
            }
            current_indent = indent;
        }
        None
    }
}

fn push_trimmed(text: &str, start: usize, end: usize, args: &mut Vec<Arg>) {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let offset = slice.len() - slice.trim_start().len();
    args.push(Arg {
        start: start + offset,
        end: start + offset + trimmed.len(),
    });
}

/// Byte ranges of string literals and comments
fn scan_masked(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'#' => {
                let end = line_end(text, i);
                spans.push((i, end));
                i = end;
            }
            quote @ (b'"' | b'\'') => {
                let triple = i + 2 < len && bytes[i + 1] == quote && bytes[i + 2] == quote;
                let mut j = if triple { i + 3 } else { i + 1 };
                while j < len {
                    if bytes[j] == b'\\' {
                        j += 2;
                        continue;
                    }
                    if triple {
                        if j + 2 < len && bytes[j] == quote && bytes[j + 1] == quote && bytes[j + 2] == quote {
                            j += 3;
                            break;
                        }
                    } else if bytes[j] == quote {
                        j += 1;
                        break;
                    } else if bytes[j] == b'\n' {
                        break;
                    }
                    j += 1;
                }
                let end = j.min(len);
                spans.push((i, end));
                i = end;
            }
            _ => i += 1,
        }
    }
    spans
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Value of a plain (unprefixed, single line) string literal
pub fn decode_string_literal(raw: &str) -> Option<String> {
    let quote = raw.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    if raw.len() < 2 || !raw.ends_with(quote) || raw.starts_with("\"\"\"") || raw.starts_with("'''") {
        return None;
    }

    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == quote {
            return None;
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => return None,
        }
    }
    Some(out)
}

pub fn line_start(text: &str, pos: usize) -> usize {
    text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0)
}

/// Index of the newline ending the line at `pos`, or the text length
pub fn line_end(text: &str, pos: usize) -> usize {
    text[pos..].find('\n').map(|i| pos + i).unwrap_or(text.len())
}

/// End of the line at `pos` including its newline
pub fn line_end_inclusive(text: &str, pos: usize) -> usize {
    let end = line_end(text, pos);
    if end < text.len() {
        end + 1
    } else {
        end
    }
}

pub fn indent_width(text: &str, line_start: usize) -> usize {
    text[line_start..]
        .bytes()
        .take_while(|b| *b == b' ' || *b == b'\t')
        .count()
}

/// End of the last top-level import statement, or of the module docstring
pub fn import_block_end(text: &str) -> usize {
    static TOP_IMPORT: OnceLock<Regex> = OnceLock::new();

    let source = Source::new(text);
    let mut end = None;
    for m in source.find_code(cached(&TOP_IMPORT, r"(?m)^(?:import|from)[ \t]+[\w.]+")) {
        let rest = &text[m.end()..line_end(text, m.end())];
        let stmt_end = match rest.find('(') {
            Some(offset) if source.is_code(m.end() + offset) => source
                .matching_bracket(m.end() + offset)
                .map(|close| line_end_inclusive(text, close))
                .unwrap_or_else(|| line_end_inclusive(text, m.end())),
            _ => line_end_inclusive(text, m.end()),
        };
        end = Some(stmt_end);
    }
    end.unwrap_or_else(|| after_module_docstring(text))
}

/// Offset after the import block and a `load_dotenv()` call directly below it
pub fn after_imports(text: &str) -> usize {
    static DOTENV_CALL: OnceLock<Regex> = OnceLock::new();

    let end = import_block_end(text);
    let rest = &text[end..];
    let skipped = rest.len() - rest.trim_start_matches('\n').len();
    let dotenv = cached(&DOTENV_CALL, r"^load_dotenv\([^\n]*\)[ \t]*(?:\n|$)");
    match dotenv.find(&rest[skipped..]) {
        Some(m) => end + skipped + m.end(),
        None => end,
    }
}

fn after_module_docstring(text: &str) -> usize {
    let trimmed = text.trim_start();
    let lead = text.len() - trimmed.len();
    for quote in ["\"\"\"", "'''"] {
        if let Some(body) = trimmed.strip_prefix(quote) {
            if let Some(close) = body.find(quote) {
                return line_end_inclusive(text, lead + quote.len() + close + quote.len());
            }
        }
    }
    0
}

/// Insert `block` (complete lines) at `at`
pub fn insert_lines(text: &str, at: usize, block: &str) -> String {
    let mut out = String::with_capacity(text.len() + block.len() + 2);
    out.push_str(&text[..at]);
    if at > 0 && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(block);
    if !block.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&text[at..]);
    out
}

/// Insert `block` right after the import block
pub fn insert_after_imports(text: &str, block: &str) -> String {
    insert_lines(text, after_imports(text), block)
}

/// Append an import statement to the import block
pub fn insert_import(text: &str, statement: &str) -> String {
    insert_lines(text, import_block_end(text), statement)
}

/// Smallest line-aligned region that differs between `before` and `after`
pub fn changed_region(before: &str, after: &str) -> (String, String) {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();

    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    (
        old[prefix..old.len() - suffix].join("\n"),
        new[prefix..new.len() - suffix].join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_and_comments_are_masked() {
        let code = "x = \"a.invoke(1)\"  # b.invoke(2)\ny = '''\nc.invoke(3)\n'''\nz.invoke(4)\n";
        let source = Source::new(code);
        let re = Regex::new(r"\w+\.invoke\(").unwrap();
        let hits: Vec<&str> = source.find_code(&re).into_iter().map(|m| m.as_str()).collect();
        assert_eq!(hits, vec!["z.invoke("]);
    }

    #[test]
    fn test_escaped_quote_inside_triple_string() {
        let code = "s = \"\"\"ends with \\\"\"\"\"\nroot_agent = 1\n";
        let source = Source::new(code);
        assert!(source.is_code(code.find("root_agent").unwrap()));
    }

    #[test]
    fn test_split_args_respects_nesting_and_strings() {
        let code = "f(a, g(b, c), \"x, y\", k=[1, 2],)";
        let source = Source::new(code);
        let close = source.matching_bracket(1).unwrap();
        let args: Vec<&str> = source
            .split_args(1, close)
            .into_iter()
            .map(|a| source.arg_text(a))
            .collect();
        assert_eq!(args, vec!["a", "g(b, c)", "\"x, y\"", "k=[1, 2]"]);
    }

    #[test]
    fn test_kwarg_detection() {
        let code = "f(name = \"x\", a == b)";
        let source = Source::new(code);
        let args = source.split_args(1, code.len() - 1);
        let (key, value) = source.kwarg(args[0]).unwrap();
        assert_eq!(source.arg_text(key), "name");
        assert_eq!(source.arg_text(value), "\"x\"");
        assert!(source.kwarg(args[1]).is_none());
    }

    #[test]
    fn test_list_items() {
        let code = "[\"-y\", 'run', smithery_api_key, \"a\\\"b\"]";
        let source = Source::new(code);
        let items = source.list_items(0, code.len() - 1);
        assert_eq!(items[0], ListItem { text: "-y".into(), bare: false });
        assert_eq!(items[1].text, "run");
        assert_eq!(items[2], ListItem { text: "smithery_api_key".into(), bare: true });
        assert_eq!(items[3].text, "a\"b");
    }

    #[test]
    fn test_bound_names() {
        let code = "import os, json as j\nfrom x.y import (A,\n    B as C)\ndef helper():\n    value = 1\nTOP = 2\n";
        let names = Source::new(code).bound_names();
        for name in ["os", "j", "A", "C", "helper", "value", "TOP"] {
            assert!(names.contains(name), "{name}");
        }
        assert!(!names.contains("B"));
    }

    #[test]
    fn test_enclosing_def() {
        let code = "def main():\n    if True:\n        agent.invoke(1)\n\nagent.invoke(2)\n";
        let source = Source::new(code);
        let site = source.enclosing_def(code.find("agent.invoke(1)").unwrap()).unwrap();
        assert_eq!(site.name, "main");
        assert!(!site.is_async);
        assert!(source.enclosing_def(code.rfind("agent.invoke").unwrap()).is_none());
    }

    #[test]
    fn test_insert_after_imports() {
        let code = "\"\"\"Doc.\"\"\"\nimport os\nfrom a import (b,\n    c)\n\nload_dotenv()\n\nx = 1\n";
        let out = insert_after_imports(code, "Y = 2\n");
        assert!(out.contains("load_dotenv()\nY = 2\n"));

        let out = insert_after_imports("\"\"\"Doc.\"\"\"\nx = 1\n", "import os\n");
        assert_eq!(out, "\"\"\"Doc.\"\"\"\nimport os\nx = 1\n");
    }

    #[test]
    fn test_insert_import_goes_above_dotenv_call() {
        let code = "import os\n\nload_dotenv()\n";
        let out = insert_import(code, "import asyncio");
        assert_eq!(out, "import os\nimport asyncio\n\nload_dotenv()\n");
    }

    #[test]
    fn test_changed_region() {
        let (old, new) = changed_region("a\nb\nc\n", "a\nB\nB2\nc\n");
        assert_eq!(old, "b");
        assert_eq!(new, "B\nB2");
    }
}
