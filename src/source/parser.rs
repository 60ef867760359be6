//! Text-level parsing of circuit sources
//!
//! Everything here is a pure `text -> structured record` function so resolution and
//! payload building never depend on how declarations are recognised.
//!
//! Known limitation: comment stripping is regex based and does not understand string
//! literals, so a literal containing `//` or `/*` is cut as if it were a comment.
//! Circuit sources rarely embed such literals.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"//.*|/\*[\s\S]*?\*/").expect("valid regex"))
}

fn include_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"include\s+"([^"]+)"\s*;"#).expect("valid regex"))
}

fn main_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"component\s+main\s*(\{\s*public\s*\[\s*([^\]]*)\s*\]\s*\})?\s*=\s*([a-zA-Z0-9_]+)\(([^)]*)\);",
        )
        .expect("valid regex")
    })
}

/// The `component main` declaration of an entry file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainDeclaration {
    pub template_name: String,
    /// Constructor arguments as written, not evaluated
    pub positional_args: Vec<String>,
    pub public_signal_names: Vec<String>,
    /// Exact matched statement text
    pub literal_text: String,
}

/// Removes `//` line comments and `/* */` block comments.
pub fn strip_comments(source: &str) -> String {
    comment_re().replace_all(source, "").into_owned()
}

/// Every `include "<path>";` statement in order, duplicates kept.
pub fn extract_includes(source: &str) -> Vec<String> {
    include_re()
        .captures_iter(source)
        .map(|c| c[1].to_string())
        .collect()
}

/// Parses the first `component main ... = Template(args);` statement, if any.
pub fn parse_main_declaration(source: &str) -> Option<MainDeclaration> {
    let captures = main_re().captures(source)?;

    Some(MainDeclaration {
        template_name: captures[3].to_string(),
        positional_args: split_list(captures.get(4).map(|m| m.as_str())),
        public_signal_names: split_list(captures.get(2).map(|m| m.as_str())),
        literal_text: captures[0].to_string(),
    })
}

/// Removes the main declaration from `source`.
///
/// Only text outside comments is considered, so a commented-out copy of the
/// statement is left alone. Tries the exact literal first, then re-matches in case
/// the declaration was parsed from a copy whose whitespace differs from `source`.
pub fn remove_main_declaration(source: &str, declaration: &MainDeclaration) -> Option<String> {
    let masked = mask_comments(source);
    let (start, end) = match masked.find(&declaration.literal_text) {
        Some(start) => (start, start + declaration.literal_text.len()),
        None => {
            let found = main_re().find(&masked)?;
            (found.start(), found.end())
        }
    };
    let mut out = String::with_capacity(source.len());
    out.push_str(&source[..start]);
    out.push_str(&source[end..]);
    Some(out)
}

/// Blanks every comment with spaces of the same byte length, keeping offsets
/// valid for the original text.
fn mask_comments(source: &str) -> String {
    comment_re()
        .replace_all(source, |c: &Captures| " ".repeat(c[0].len()))
        .into_owned()
}

/// Rewrites include paths found in `replacements`; other includes are left as is.
pub fn rewrite_includes(source: &str, replacements: &HashMap<&str, String>) -> String {
    include_re()
        .replace_all(source, |c: &Captures| match replacements.get(&c[1]) {
            Some(path) => format!("include \"{}\";", path),
            None => c[0].to_string(),
        })
        .into_owned()
}

fn split_list(list: Option<&str>) -> Vec<String> {
    list.map(|s| {
        s.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    })
    .unwrap_or_default()
}
