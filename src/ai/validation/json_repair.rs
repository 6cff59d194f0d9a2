//! JSON Array Repair
//!
//! Extracts the first top-level JSON array from model output and repairs the
//! damage typical of truncated generations.
//!
//! Handles:
//! - Markdown code fence wrapping (```json ... ```), closed or not
//! - Prose before or after the array
//! - Trailing commas
//! - Output cut off mid-element or mid-string
//!
//! When no element completed, the cut-off first element is kept only up to
//! its last complete value. An unterminated string or a number that may have
//! lost digits is dropped together with its key, never closed off.
//!
//! A response that is still unparseable after repair is reported as
//! `Truncated` when it is structurally incomplete and as `Parse` otherwise.

use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{MarksortError, Result};

/// Longest content preview kept in error messages
const PREVIEW_CHARS: usize = 200;

/// Parsed array plus whether repair was needed
#[derive(Debug, Clone, PartialEq)]
pub struct RepairedArray {
    pub items: Vec<Value>,
    pub was_repaired: bool,
    /// The last element was cut short and holds only its complete fields
    pub last_partial: bool,
}

impl RepairedArray {
    fn complete(items: Vec<Value>, was_repaired: bool) -> Self {
        Self {
            items,
            was_repaired,
            last_partial: false,
        }
    }
}

// =============================================================================
// Bracket Scanner
// =============================================================================

/// String-aware bracket scan starting at an opening `[`
#[derive(Debug, Default)]
struct Scan {
    /// Byte index one past the matching `]`
    end: Option<usize>,
    /// Openers still unclosed when input ran out
    stack: Vec<char>,
    in_string: bool,
    /// Byte index where the last complete top-level element ends
    last_element_end: Option<usize>,
}

fn scan_array(s: &str) -> Scan {
    let mut scan = Scan::default();
    let mut escape = false;

    for (i, ch) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if scan.in_string {
            match ch {
                '\\' => escape = true,
                '"' => scan.in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => scan.in_string = true,
            '[' | '{' => scan.stack.push(ch),
            ']' | '}' => {
                scan.stack.pop();
                match scan.stack.len() {
                    0 => {
                        scan.end = Some(i + 1);
                        return scan;
                    }
                    1 => scan.last_element_end = Some(i + 1),
                    _ => {}
                }
            }
            ',' if scan.stack.len() == 1 => {
                // Everything before a top-level comma is a complete element
                scan.last_element_end = Some(i);
            }
            _ => {}
        }
    }
    scan
}

/// Last point inside a cut-off element where every value so far is complete,
/// with the openers still unclosed there.
///
/// Safe points: before a comma, after a nested close, and after the closing
/// quote of a string value. Keys and bare scalars never end a safe prefix.
fn last_safe_cut(s: &str) -> Option<(usize, Vec<char>)> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut string_is_value = false;
    let mut escape = false;
    let mut prev: Option<char> = None;
    let mut cut = None;

    for (i, ch) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if in_string {
            match ch {
                '\\' => escape = true,
                '"' => {
                    in_string = false;
                    prev = Some('"');
                    if string_is_value && stack.len() >= 2 {
                        cut = Some((i + 1, stack.clone()));
                    }
                }
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                string_is_value = stack.last() == Some(&'[') || prev == Some(':');
            }
            '[' | '{' => stack.push(ch),
            ']' | '}' => {
                stack.pop();
                if stack.len() >= 2 {
                    cut = Some((i + 1, stack.clone()));
                }
            }
            ',' if stack.len() >= 2 => cut = Some((i, stack.clone())),
            _ => {}
        }
        if !ch.is_whitespace() {
            prev = Some(ch);
        }
    }
    cut
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn closer_for(opener: char) -> char {
    if opener == '{' { '}' } else { ']' }
}

// =============================================================================
// JsonRepairer
// =============================================================================

/// Array extraction and repair
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRepairer;

impl JsonRepairer {
    pub fn new() -> Self {
        Self
    }

    /// Parse the first JSON array in `raw`, repairing it if needed
    pub fn parse_array(&self, raw: &str) -> Result<RepairedArray> {
        let cleaned = self.preprocess(raw);
        if cleaned.is_empty() {
            return Err(MarksortError::Parse("Empty model response".to_string()));
        }

        let Some(start) = cleaned.find('[') else {
            return self.array_from_object(&cleaned);
        };
        let body = &cleaned[start..];
        let scan = scan_array(body);

        match scan.end {
            Some(end) => self.parse_complete(&body[..end]),
            None => self.parse_truncated(body, &scan),
        }
    }

    /// Trim, drop BOM, and unwrap markdown code fences
    fn preprocess(&self, raw: &str) -> String {
        let s = raw.trim().trim_start_matches('\u{feff}');
        self.strip_code_fences(s).trim().to_string()
    }

    /// Keep the contents of the first fenced block. An unclosed fence keeps
    /// everything after the opening line.
    fn strip_code_fences<'a>(&self, s: &'a str) -> &'a str {
        let Some(open) = s.find("```") else {
            return s;
        };
        let after_open = &s[open + 3..];
        let content_start = after_open.find('\n').map(|i| i + 1).unwrap_or(after_open.len());
        let content = &after_open[content_start..];
        match content.find("```") {
            Some(close) => &content[..close],
            None => content,
        }
    }

    /// A balanced array: parse, then retry without trailing commas
    fn parse_complete(&self, candidate: &str) -> Result<RepairedArray> {
        let first_err = match serde_json::from_str::<Vec<Value>>(candidate) {
            Ok(items) => return Ok(RepairedArray::complete(items, false)),
            Err(e) => e,
        };

        debug!("Initial JSON parse failed, attempting repair: {}", first_err);
        let fixed = self.fix_trailing_commas(candidate);
        match serde_json::from_str::<Vec<Value>>(&fixed) {
            Ok(items) => {
                warn!("JSON repaired (trailing commas)");
                Ok(RepairedArray::complete(items, true))
            }
            Err(e) if e.is_eof() => Err(MarksortError::Truncated(preview(candidate))),
            Err(e) => Err(MarksortError::Parse(format!(
                "{} in: {}",
                e,
                preview(candidate)
            ))),
        }
    }

    /// An array whose closing bracket never arrived
    fn parse_truncated(&self, body: &str, scan: &Scan) -> Result<RepairedArray> {
        debug!(
            open = scan.stack.len(),
            in_string = scan.in_string,
            "Model output ends inside an open array"
        );

        // Keep only the elements that completed
        if let Some(end) = scan.last_element_end {
            let mut trimmed = self.fix_trailing_commas(&body[..end]);
            trimmed.truncate(trimmed.trim_end().trim_end_matches(',').len());
            trimmed.push(']');
            if let Ok(items) = serde_json::from_str::<Vec<Value>>(&trimmed)
                && !items.is_empty()
            {
                warn!("JSON repaired by trimming to {} complete elements", items.len());
                return Ok(RepairedArray::complete(items, true));
            }
        }

        // Keep the complete fields of the cut-off element
        let Some((cut, open)) = last_safe_cut(body) else {
            return Err(MarksortError::Truncated(preview(body)));
        };
        let mut closed = body[..cut].to_string();
        for opener in open.iter().rev() {
            closed.push(closer_for(*opener));
        }
        let closed = self.fix_trailing_commas(&closed);

        match serde_json::from_str::<Vec<Value>>(&closed) {
            Ok(items) if items.last().is_some_and(|v| !is_empty_container(v)) => {
                warn!(
                    dropped_bytes = body.len() - cut,
                    "JSON repaired by closing a partial element"
                );
                Ok(RepairedArray {
                    items,
                    was_repaired: true,
                    last_partial: true,
                })
            }
            _ => Err(MarksortError::Truncated(preview(body))),
        }
    }

    /// No `[` at all: accept an object wrapping a single array field
    fn array_from_object(&self, cleaned: &str) -> Result<RepairedArray> {
        let value: Value = serde_json::from_str(cleaned).map_err(|e| {
            if e.is_eof() {
                MarksortError::Truncated(preview(cleaned))
            } else {
                MarksortError::Parse(format!("No JSON array in response: {}", preview(cleaned)))
            }
        })?;

        match value {
            Value::Object(map) => map
                .into_iter()
                .find_map(|(_, v)| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .map(|items| RepairedArray::complete(items, true))
                .ok_or_else(|| {
                    MarksortError::Parse(format!("No JSON array in response: {}", preview(cleaned)))
                }),
            _ => Err(MarksortError::Parse(format!(
                "No JSON array in response: {}",
                preview(cleaned)
            ))),
        }
    }

    /// Remove commas directly followed by `]` or `}` outside strings
    fn fix_trailing_commas(&self, s: &str) -> String {
        let chars: Vec<char> = s.chars().collect();
        let mut result = String::with_capacity(s.len());
        let mut in_string = false;
        let mut escape = false;

        for (i, &ch) in chars.iter().enumerate() {
            if escape {
                escape = false;
                result.push(ch);
                continue;
            }
            match ch {
                '\\' if in_string => escape = true,
                '"' => in_string = !in_string,
                ',' if !in_string => {
                    let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                    if matches!(next, Some(']') | Some('}')) {
                        continue;
                    }
                }
                _ => {}
            }
            result.push(ch);
        }
        result
    }
}

fn preview(s: &str) -> String {
    let mut out: String = s.chars().take(PREVIEW_CHARS).collect();
    if s.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}
