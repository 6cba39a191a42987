//! Structural repair for almost-JSON model output.
//!
//! Handles the failure modes models actually produce: markdown code fences,
//! prose around the payload, trailing commas, and output truncated mid-value.
//! Content is never rewritten, only structure.

use serde_json::Value;

/// Parses `raw` strictly, then once more after [`repair_json`].
/// The flag reports whether the repair pass was needed.
pub fn parse_lenient(raw: &str) -> Result<(Value, bool), serde_json::Error> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => Ok((value, false)),
        Err(_) => serde_json::from_str::<Value>(&repair_json(raw)).map(|value| (value, true)),
    }
}

pub fn repair_json(raw: &str) -> String {
    let body = extract_json_body(strip_code_fences(raw));
    let mut out = String::with_capacity(body.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in body.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '{' => {
                stack.push('}');
                out.push(ch);
            }
            '[' => {
                stack.push(']');
                out.push(ch);
            }
            '}' | ']' => {
                // Stray closers are dropped; a closer for an outer container
                // first closes everything still open inside it.
                if stack.contains(&ch) {
                    while let Some(closer) = stack.pop() {
                        trim_trailing_comma(&mut out);
                        out.push(closer);
                        if closer == ch {
                            break;
                        }
                    }
                }
            }
            _ => out.push(ch),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(':') {
        out.push_str(" null");
    }
    while let Some(closer) = stack.pop() {
        trim_trailing_comma(&mut out);
        out.push(closer);
    }
    out
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening fence line.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or_default();
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Slices from the first opening bracket to the last closing one, dropping
/// any surrounding prose. Text without a closer is kept to the end.
fn extract_json_body(text: &str) -> &str {
    let Some(start) = text.find(['[', '{']) else {
        return text;
    };
    let body = &text[start..];
    match body.rfind([']', '}']) {
        Some(end) => &body[..=end],
        None => body,
    }
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    }
}
