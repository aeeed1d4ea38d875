//! `#include` / `#define` / `#info` resolution, run over raw source
//! text before the lexer sees it.

use crate::error::PreprocessError;

/// File-system access is a host concern; callers supply an `Includer`
/// so this module stays pure of I/O.
pub trait Includer {
    fn read(&self, path: &str) -> Result<String, String>;
}

/// An `Includer` that always fails: useful for tests and for
/// programs that are known not to use `#include`.
pub struct NoIncluder;

impl Includer for NoIncluder {
    fn read(&self, path: &str) -> Result<String, String> {
        Err(format!("no includer configured (wanted '{}')", path))
    }
}

/// An `#info KEY "value"` record surfaced to the host (e.g. window
/// title, author metadata); not consumed by the lexer/parser.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoRecord {
    pub key: String,
    pub value: String,
}

fn strip_include_path(raw: &str) -> &str {
    let raw = raw.trim();
    if let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return inner;
    }
    if let Some(inner) = raw.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
        return inner;
    }
    raw
}

fn parse_info(raw: &str) -> Option<(String, String)> {
    let raw = raw.trim();
    let mut parts = raw.splitn(2, char::is_whitespace);
    let key = parts.next()?.to_string();
    let rest = parts.next().unwrap_or("").trim();
    let value = rest.trim_matches('"').to_string();
    Some((key, value))
}

fn parse_define(raw: &str) -> Option<(String, String)> {
    let raw = raw.trim();
    let mut parts = raw.splitn(2, char::is_whitespace);
    let name = parts.next()?.to_string();
    let value = parts.next().unwrap_or("").trim().to_string();
    Some((name, value))
}

/// Expands `#include`, substitutes `#define`, and records `#info`
/// entries. Returns the transformed source, the collected `#info`
/// records, and any errors (unreadable include, malformed directive).
/// Like every other phase, this never aborts on the first error.
pub fn preprocess(source: &str, includer: &dyn Includer) -> (String, Vec<InfoRecord>, Vec<PreprocessError>) {
    let mut defines: Vec<(String, String)> = Vec::new();
    let mut infos = Vec::new();
    let mut errors = Vec::new();
    let mut out_lines = Vec::new();

    for (idx, line) in source.lines().enumerate() {
        let line_no = (idx + 1) as u32;
        let trimmed = line.trim_start();

        if let Some(rest) = trimmed.strip_prefix("#include") {
            let path = strip_include_path(rest);
            match includer.read(path) {
                Ok(contents) => {
                    tracing::trace!(path, line = line_no, "include resolved");
                    out_lines.push(contents)
                }
                Err(message) => errors.push(PreprocessError {
                    message: format!("cannot include '{}': {}", path, message),
                    line: line_no,
                    column: 1,
                }),
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("#define") {
            match parse_define(rest) {
                Some((name, value)) => {
                    tracing::trace!(name = %name, line = line_no, "define recorded");
                    defines.push((name, value))
                }
                None => errors.push(PreprocessError {
                    message: "malformed #define directive".to_string(),
                    line: line_no,
                    column: 1,
                }),
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("#info") {
            match parse_info(rest) {
                Some((key, value)) => infos.push(InfoRecord { key, value }),
                None => errors.push(PreprocessError {
                    message: "malformed #info directive".to_string(),
                    line: line_no,
                    column: 1,
                }),
            }
            continue;
        }

        out_lines.push(line.to_string());
    }

    let mut expanded = out_lines.join("\n");
    for (name, value) in &defines {
        expanded = substitute_define(&expanded, name, value);
    }

    tracing::debug!(
        defines = defines.len(),
        infos = infos.len(),
        errors = errors.len(),
        "preprocess finished"
    );
    (expanded, infos, errors)
}

/// Whole-word textual substitution so `#define WIDTH 640` doesn't also
/// rewrite `WIDTHX`.
fn substitute_define(source: &str, name: &str, value: &str) -> String {
    let mut result = String::with_capacity(source.len());
    let bytes: Vec<char> = source.chars().collect();
    let name_chars: Vec<char> = name.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(name_chars.as_slice()) {
            let before_ok = i == 0 || !is_ident_char(bytes[i - 1]);
            let after = i + name_chars.len();
            let after_ok = after >= bytes.len() || !is_ident_char(bytes[after]);
            if before_ok && after_ok {
                result.push_str(value);
                i = after;
                continue;
            }
        }
        result.push(bytes[i]);
        i += 1;
    }
    result
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_is_substituted() {
        let (out, _, errors) = preprocess("#define WIDTH 640\nx = WIDTH;", &NoIncluder);
        assert!(errors.is_empty());
        assert!(out.contains("x = 640;"));
    }

    #[test]
    fn info_is_recorded_and_stripped() {
        let (out, infos, errors) = preprocess("#info TITLE \"My Game\"\nmain(){}", &NoIncluder);
        assert!(errors.is_empty());
        assert_eq!(infos[0].key, "TITLE");
        assert_eq!(infos[0].value, "My Game");
        assert!(!out.contains("#info"));
    }

    #[test]
    fn missing_includer_is_an_error_not_a_panic() {
        let (_, _, errors) = preprocess("#include \"other.tfy\"", &NoIncluder);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn define_does_not_clobber_longer_identifiers() {
        let (out, _, _) = preprocess("#define X 1\nXY = 2;", &NoIncluder);
        assert!(out.contains("XY = 2;"));
    }
}
