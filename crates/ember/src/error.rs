//! Error types shared by the parser, compiler and host embedding layer.
//!
//! These are hand-rolled enums with manual `Display`/`std::error::Error`
//! impls rather than a derive-macro crate, so that a host can match on
//! them without pulling in this crate's error-handling choices.

use std::fmt;

/// A single parse error, anchored to the source character that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub char_idx: usize,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, char_idx: usize) -> Self {
        ParseError {
            message: message.into(),
            char_idx,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// A compile-time resource limit that bytecode operands cannot encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitError {
    pub what: &'static str,
    pub limit: usize,
    pub char_idx: usize,
}

impl fmt::Display for LimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Too many {}: limit is {}.", self.what, self.limit)
    }
}

impl std::error::Error for LimitError {}

/// A runtime fault raised by the VM: a type mismatch, an out-of-range
/// call, an unknown opcode, and so on (§7 taxonomy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub char_idx: usize,
}

impl RuntimeError {
    pub(crate) fn new(message: impl Into<String>, char_idx: usize) -> Self {
        RuntimeError { message: message.into(), char_idx }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RuntimeError {}

/// A compile-time rule violation that isn't a resource limit, e.g.
/// subscripting an expression that isn't a plain identifier chain (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticError {
    pub message: String,
    pub char_idx: usize,
}

impl SemanticError {
    pub(crate) fn new(message: impl Into<String>, char_idx: usize) -> Self {
        SemanticError { message: message.into(), char_idx }
    }
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SemanticError {}

/// Everything that can go wrong while turning source text into bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    Parse(Vec<ParseError>),
    Limit(LimitError),
    Semantic(SemanticError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Parse(errors) => {
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{e}")?;
                }
                Ok(())
            }
            CompileError::Limit(e) => write!(f, "{e}"),
            CompileError::Semantic(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CompileError {}

/// Formats the caret-marked diagnostic block described in the specification:
/// `<message>\n[line N] <offending line>\n<caret-aligned marker>\n`.
///
/// The left-pad before the caret is `len("[line N] ") + (char_idx - line_start)`,
/// replacing the malformed caret format of the reference implementation.
#[must_use]
pub fn format_caret_diagnostic(message: &str, source: &str, char_idx: usize) -> String {
    let char_idx = char_idx.min(source.len());
    let line_start = source[..char_idx].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[char_idx..].find('\n').map_or(source.len(), |i| i + char_idx);
    let line_no = source[..line_start].matches('\n').count() + 1;
    let offending_line = &source[line_start..line_end];
    let prefix = format!("[line {line_no}] ");
    let pad = prefix.len() + (char_idx - line_start);
    format!("{message}\n{prefix}{offending_line}\n{:>width$}\n", "^", width = pad + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_lines_up_under_the_offending_character() {
        let source = "io.print(1 + true)";
        let char_idx = source.find("true").unwrap();
        let diagnostic = format_caret_diagnostic("Cannot add bool and number.", source, char_idx);
        let lines: Vec<&str> = diagnostic.lines().collect();
        assert_eq!(lines[0], "Cannot add bool and number.");
        assert_eq!(lines[1], "[line 1] io.print(1 + true)");
        let caret_col = lines[2].find('^').unwrap();
        assert_eq!(caret_col, "[line 1] ".len() + char_idx);
    }

    #[test]
    fn handles_second_line_offsets() {
        let source = "var x = 1\nio.print(x + true)";
        let char_idx = source.find("true").unwrap();
        let diagnostic = format_caret_diagnostic("boom", source, char_idx);
        let lines: Vec<&str> = diagnostic.lines().collect();
        assert_eq!(lines[1], "[line 2] io.print(x + true)");
        let line_start = source.find('\n').unwrap() + 1;
        let caret_col = lines[2].find('^').unwrap();
        assert_eq!(caret_col, "[line 2] ".len() + (char_idx - line_start));
    }
}
