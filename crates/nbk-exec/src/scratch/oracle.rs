use crate::backend::{Completeness, CompletenessOracle, CompletionInfo};

/// Splits scratch source at the first top-level `;`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScratchOracle;

impl ScratchOracle {
    pub fn new() -> Self {
        Self
    }
}

fn incomplete(input: &str, completeness: Completeness) -> CompletionInfo {
    CompletionInfo {
        completeness,
        source: String::new(),
        remaining: input.to_string(),
    }
}

impl CompletenessOracle for ScratchOracle {
    fn analyze(&self, input: &str) -> CompletionInfo {
        if input.trim().is_empty() {
            return CompletionInfo {
                completeness: Completeness::Empty,
                source: String::new(),
                remaining: String::new(),
            };
        }

        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (idx, c) in input.char_indices() {
            if in_string {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '(' | '{' | '[' => depth += 1,
                ')' | '}' | ']' => match depth.checked_sub(1) {
                    Some(next) => depth = next,
                    None => return incomplete(input, Completeness::Unknown),
                },
                ';' if depth == 0 => {
                    let end = idx + c.len_utf8();
                    return CompletionInfo {
                        completeness: Completeness::Complete,
                        source: input[..end].trim().to_string(),
                        remaining: input[end..].to_string(),
                    };
                }
                _ => {}
            }
        }

        if in_string || depth > 0 {
            return incomplete(input, Completeness::DefinitelyIncomplete);
        }
        let trimmed = input.trim();
        if trimmed.ends_with(['+', '-', '*', '/', '%', '=', ',']) || is_bare_type(trimmed) {
            return incomplete(input, Completeness::DefinitelyIncomplete);
        }
        CompletionInfo {
            completeness: Completeness::CompleteWithSemi,
            source: format!("{trimmed};"),
            remaining: String::new(),
        }
    }
}

fn is_bare_type(text: &str) -> bool {
    matches!(text, "int" | "long" | "var" | "String")
}
