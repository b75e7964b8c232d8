//! Splits a CQL script into individually executable statements.
//!
//! Statements are delimited by `;` at the top level. Line comments (`--`,
//! `//`) and non-nesting block comments (`/* ... */`) are stripped. A `;`
//! inside a single- or double-quoted literal does not delimit; literals
//! escape their quote by doubling it (`''`, `""`).

use crate::error::{Result, SextantError};

/// Split a CQL script into trimmed, non-empty statement strings.
pub fn split_statements(script: &str) -> Result<Vec<String>> {
    let chars: Vec<char> = script.chars().collect();
    let len = chars.len();

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut line = 1;
    let mut i = 0;

    while i < len {
        let c = chars[i];
        match c {
            '-' if i + 1 < len && chars[i + 1] == '-' => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if i + 1 < len && chars[i + 1] == '/' => {
                while i < len && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if i + 1 < len && chars[i + 1] == '*' => {
                let start_line = line;
                i += 2;
                loop {
                    if i + 1 >= len {
                        return Err(SextantError::UnterminatedBlockComment { line: start_line });
                    }
                    if chars[i] == '*' && chars[i + 1] == '/' {
                        i += 2;
                        break;
                    }
                    if chars[i] == '\n' {
                        line += 1;
                    }
                    i += 1;
                }
                // A comment separates tokens the way whitespace does.
                current.push(' ');
            }
            '\'' | '"' => {
                let quote = c;
                let start_line = line;
                current.push(quote);
                i += 1;
                loop {
                    if i >= len {
                        return Err(SextantError::UnterminatedLiteral { line: start_line });
                    }
                    if chars[i] == quote {
                        if i + 1 < len && chars[i + 1] == quote {
                            current.push(quote);
                            current.push(quote);
                            i += 2;
                        } else {
                            current.push(quote);
                            i += 1;
                            break;
                        }
                    } else {
                        if chars[i] == '\n' {
                            line += 1;
                        }
                        current.push(chars[i]);
                        i += 1;
                    }
                }
            }
            ';' => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
                i += 1;
            }
            _ => {
                if c == '\n' {
                    line += 1;
                }
                current.push(c);
                i += 1;
            }
        }
    }

    let remainder = current.trim();
    if !remainder.is_empty() {
        statements.push(remainder.to_string());
    }

    Ok(statements)
}
