use crate::block::BlockId;
use crate::codegen::GeneratedProgram;
use regex::Regex;
use std::fmt::{Display, Formatter};

/// Lines the backend wraps around submitted code before compiling it.
pub const DEFAULT_WRAPPER_LINE_OFFSET: usize = 4;
pub const ALREADY_RUNNING_MARKER: &str = "Another code execution is already running";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRef {
    pub kind: String,
    pub name: String,
}

/// One `<file>:<line>: error: <message>` report from the backend compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    pub line: usize,
    pub message: String,
    pub source_line: Option<String>,
    /// 1-based column taken from the `^` indicator.
    pub column: Option<usize>,
    pub symbol: Option<SymbolRef>,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)?;
        if let Some(symbol) = &self.symbol {
            write!(f, " ({} {})", symbol.kind, symbol.name)?;
        }
        Ok(())
    }
}

/// Where a diagnostic lands in the generated program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// 1-based line of the generated program.
    pub line: Option<usize>,
    pub block: Option<BlockId>,
    pub message: String,
}

pub fn is_already_running(text: &str) -> bool {
    text.contains(ALREADY_RUNNING_MARKER)
}

pub fn parse_diagnostics(payload: &str) -> Vec<Diagnostic> {
    let header = Regex::new(r"([\w.$/\\-]+):(\d+): error: (.*)$").ok();
    let symbol = Regex::new(r"symbol:\s+(\w+)\s+([\w$]+)").ok();
    let (Some(header), Some(symbol)) = (header, symbol) else {
        return Vec::new();
    };

    let mut out: Vec<Diagnostic> = Vec::new();
    for line in payload.lines() {
        if let Some(caps) = header.captures(line) {
            let Ok(number) = caps[2].parse::<usize>() else {
                continue;
            };
            let mut message = caps[3].trim().to_string();
            let mut found = None;
            if let Some(sym) = symbol.captures(&message) {
                found = Some(SymbolRef {
                    kind: sym[1].to_string(),
                    name: sym[2].to_string(),
                });
                let start = sym.get(0).map_or(message.len(), |m| m.start());
                message = message[..start].trim_end().to_string();
            }
            out.push(Diagnostic {
                file: caps[1].to_string(),
                line: number,
                message,
                source_line: None,
                column: None,
                symbol: found,
            });
            continue;
        }
        let Some(current) = out.last_mut() else {
            continue;
        };
        if let Some(sym) = symbol.captures(line) {
            current.symbol = Some(SymbolRef {
                kind: sym[1].to_string(),
                name: sym[2].to_string(),
            });
        } else if line.trim() == "^" {
            current.column = line.find('^').map(|i| i + 1);
        } else if current.source_line.is_none()
            && current.column.is_none()
            && !line.trim().is_empty()
            && !line.trim_start().starts_with("location:")
        {
            current.source_line = Some(line.to_string());
        }
    }
    out
}

/// Maps a diagnostic to a line and block of `program`.
///
/// The backend line minus `wrapper_line_offset` is tried first, then the first line
/// mentioning the diagnostic's symbol. Without either the anchor is top-level only.
pub fn anchor(diag: &Diagnostic, program: &GeneratedProgram, wrapper_line_offset: usize) -> Anchor {
    let message = diag.to_string();
    let by_line = diag
        .line
        .checked_sub(wrapper_line_offset)
        .and_then(|line| program.block_for_line(line).map(|block| (line, block)));
    if let Some((line, block)) = by_line {
        return Anchor {
            line: Some(line),
            block: Some(block.to_string()),
            message,
        };
    }
    let mention = diag.symbol.as_ref().and_then(|symbol| {
        let word = Regex::new(&format!(r"\b{}\b", regex::escape(&symbol.name))).ok()?;
        program
            .lines
            .iter()
            .position(|l| word.is_match(&l.text))
            .map(|i| (i + 1, program.lines[i].block.clone()))
    });
    match mention {
        Some((line, block)) => Anchor {
            line: Some(line),
            block: Some(block),
            message,
        },
        None => Anchor {
            line: None,
            block: None,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::EmittedLine;

    fn program(lines: &[(&str, &str)]) -> GeneratedProgram {
        GeneratedProgram {
            lines: lines
                .iter()
                .map(|(text, block)| EmittedLine {
                    text: text.to_string(),
                    block: block.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn javac_report_is_split_into_parts() {
        let payload = "Error: UserScript:12: error: cannot find symbol\n    foo = 5;\n    ^\n  symbol:   variable foo\n  location: class UserScript\n";
        let diags = parse_diagnostics(payload);
        assert_eq!(diags.len(), 1);
        let diag = &diags[0];
        assert_eq!(diag.file, "UserScript");
        assert_eq!(diag.line, 12);
        assert_eq!(diag.message, "cannot find symbol");
        assert_eq!(diag.source_line.as_deref(), Some("    foo = 5;"));
        assert_eq!(diag.column, Some(5));
        assert_eq!(
            diag.symbol,
            Some(SymbolRef {
                kind: "variable".to_string(),
                name: "foo".to_string()
            })
        );
    }

    #[test]
    fn single_line_report_keeps_its_symbol() {
        let diags = parse_diagnostics("UserScript:12: error: cannot find symbol ... symbol: variable foo");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "cannot find symbol ...");
        assert_eq!(diags[0].symbol.as_ref().map(|s| s.name.as_str()), Some("foo"));
        assert_eq!(diags[0].to_string(), "cannot find symbol ... (variable foo)");
    }

    #[test]
    fn several_reports_are_separated() {
        let payload = "A.java:3: error: ';' expected\nA.java:9: error: missing return\n";
        let lines = parse_diagnostics(payload).iter().map(|d| d.line).collect::<Vec<_>>();
        assert_eq!(lines, vec![3, 9]);
    }

    #[test]
    fn anchor_subtracts_the_wrapper_lines() {
        let generated = program(&[
            ("int foo = 0;", "b1"),
            ("highlightBlock(\"b2\");", "b2"),
            ("move_up(foo);", "b2"),
        ]);
        let diag = &parse_diagnostics("UserScript:7: error: incompatible types")[0];
        let anchored = anchor(diag, &generated, DEFAULT_WRAPPER_LINE_OFFSET);
        assert_eq!(anchored.line, Some(3));
        assert_eq!(anchored.block.as_deref(), Some("b2"));
    }

    #[test]
    fn anchor_falls_back_to_the_symbol() {
        let generated = program(&[("int food = 1;", "b1"), ("move_up(foo);", "b5")]);
        let diag = &parse_diagnostics("UserScript:40: error: cannot find symbol ... symbol: variable foo")[0];
        let anchored = anchor(diag, &generated, DEFAULT_WRAPPER_LINE_OFFSET);
        assert_eq!(anchored.line, Some(2));
        assert_eq!(anchored.block.as_deref(), Some("b5"));
    }

    #[test]
    fn unattributable_reports_stay_top_level() {
        let generated = program(&[("rest();", "b1")]);
        let diag = &parse_diagnostics("UserScript:2: error: class, interface, or enum expected")[0];
        let anchored = anchor(diag, &generated, DEFAULT_WRAPPER_LINE_OFFSET);
        assert_eq!(anchored.line, None);
        assert_eq!(anchored.block, None);
        assert_eq!(anchored.message, "class, interface, or enum expected");
    }

    #[test]
    fn already_running_text_is_recognised() {
        assert!(is_already_running(
            "Another code execution is already running. Please stop it first."
        ));
        assert!(!is_already_running("OK - Code execution started"));
    }
}
