//! Response Validation
//!
//! Maps parsed array elements onto the requested batch and enforces the
//! category rules:
//! - `id` resolves as a 1-based batch index first, then as a literal bookmark id
//! - Missing titles default from the batch
//! - Confidence is clamped to `[0, 1]` (default 0.5)
//! - Forbidden categories are replaced by the fallback category

use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use crate::constants::organizer as consts;
use crate::types::{BookmarkRecord, CategorizedBookmark, MarksortError, Result};

/// Confidence assigned when the model omits one
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Keys a model may use for the assigned folder, in lookup order
const CATEGORY_KEYS: [&str; 3] = ["category", "folder", "path"];

/// Category text of a response element, if it carries one
pub(crate) fn raw_category(element: &Value) -> Option<&str> {
    CATEGORY_KEYS
        .iter()
        .find_map(|k| element.get(*k).and_then(Value::as_str))
}

/// Severity levels for validation issues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Response unusable
    Error,
    /// Element dropped or value replaced
    Warning,
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueSeverity::Error => write!(f, "ERROR"),
            IssueSeverity::Warning => write!(f, "WARN"),
        }
    }
}

/// A single validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub message: String,
    /// Element position in the model's array
    pub index: Option<usize>,
}

impl ValidationIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            message: message.into(),
            index: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            message: message.into(),
            index: None,
        }
    }

    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "[{}] element {}: {}", self.severity, i, self.message),
            None => write!(f, "[{}] {}", self.severity, self.message),
        }
    }
}

/// Mapped assignments plus the issues found on the way
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub items: Vec<CategorizedBookmark>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .count()
    }
}

/// Category rules applied to every response
#[derive(Debug, Clone)]
pub struct CategoryRules {
    /// Compared case-insensitively against the whole path and its first segment
    pub forbidden: Vec<String>,
    pub fallback: String,
}

impl Default for CategoryRules {
    fn default() -> Self {
        Self {
            forbidden: vec![consts::FORBIDDEN_CATEGORY.to_string()],
            fallback: consts::FALLBACK_CATEGORY.to_string(),
        }
    }
}

impl CategoryRules {
    /// Whether the category or its first path segment is forbidden
    pub fn is_forbidden(&self, category: &str) -> bool {
        let whole = category.trim();
        let first = whole.split('/').next().unwrap_or(whole).trim();
        self.forbidden
            .iter()
            .any(|f| f.eq_ignore_ascii_case(whole) || f.eq_ignore_ascii_case(first))
    }
}

/// Collapse separators and whitespace in a folder path
pub fn normalize_category(raw: &str) -> String {
    raw.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub struct ResponseValidator {
    rules: CategoryRules,
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new(CategoryRules::default())
    }
}

impl ResponseValidator {
    pub fn new(rules: CategoryRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &CategoryRules {
        &self.rules
    }

    /// Map array elements onto `batch`
    pub fn validate_categorizations(
        &self,
        elements: &[Value],
        batch: &[BookmarkRecord],
    ) -> ValidationResult {
        let mut result = ValidationResult::default();
        let mut seen: HashSet<String> = HashSet::new();

        for (index, element) in elements.iter().enumerate() {
            let Some(obj) = element.as_object() else {
                result
                    .issues
                    .push(ValidationIssue::warning("element is not an object").at(index));
                continue;
            };

            let Some((raw_id, bookmark)) = obj.get("id").and_then(|id| resolve_id(id, batch))
            else {
                result.issues.push(
                    ValidationIssue::warning(format!(
                        "id {} does not match the batch",
                        obj.get("id").cloned().unwrap_or(Value::Null)
                    ))
                    .at(index),
                );
                continue;
            };

            if !seen.insert(bookmark.id.clone()) {
                result.issues.push(
                    ValidationIssue::warning(format!("duplicate assignment for {}", bookmark.id))
                        .at(index),
                );
                continue;
            }

            let mut category = normalize_category(raw_category(element).unwrap_or_default());
            if category.is_empty() {
                result
                    .issues
                    .push(ValidationIssue::warning("missing category").at(index));
                category = self.rules.fallback.clone();
            } else if self.rules.is_forbidden(&category) {
                result.issues.push(
                    ValidationIssue::warning(format!(
                        "forbidden category '{}' replaced with '{}'",
                        category, self.rules.fallback
                    ))
                    .at(index),
                );
                category = self.rules.fallback.clone();
            }

            if self.rules.is_forbidden(&category) {
                result.issues.push(
                    ValidationIssue::error(format!(
                        "category '{}' is forbidden and has no allowed replacement",
                        category
                    ))
                    .at(index),
                );
            }

            let title = obj
                .get("title")
                .and_then(Value::as_str)
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(bookmark.title.as_str())
                .to_string();

            let confidence = obj
                .get("confidence")
                .and_then(Value::as_f64)
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(DEFAULT_CONFIDENCE);

            result.items.push(CategorizedBookmark {
                id: raw_id,
                bookmark_id: bookmark.id.clone(),
                category,
                title,
                confidence,
            });
        }

        result
    }

    /// Validate and fail the whole batch on any error-level issue
    pub fn categorizations(
        &self,
        elements: &[Value],
        batch: &[BookmarkRecord],
    ) -> Result<ValidationResult> {
        let result = self.validate_categorizations(elements, batch);
        if !result.is_valid() {
            let errors: Vec<String> = result
                .issues
                .iter()
                .filter(|i| i.severity == IssueSeverity::Error)
                .map(|i| i.to_string())
                .collect();
            return Err(MarksortError::Validation(errors.join("; ")));
        }
        Ok(result)
    }

    /// Folder names from a suggestion response, deduplicated and rule-checked
    pub fn category_names(&self, elements: &[Value], max: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        elements
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.as_str()),
                Value::Object(o) => ["name", "category"]
                    .iter()
                    .find_map(|k| o.get(*k).and_then(Value::as_str)),
                _ => None,
            })
            .map(normalize_category)
            .filter(|c| !c.is_empty() && !self.rules.is_forbidden(c))
            .filter(|c| seen.insert(c.to_lowercase()))
            .take(max)
            .collect()
    }
}

/// Resolve an element id to a batch entry
fn resolve_id<'a>(id: &Value, batch: &'a [BookmarkRecord]) -> Option<(String, &'a BookmarkRecord)> {
    let text = match id {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };

    let by_index = text
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=batch.len()).contains(n))
        .map(|n| &batch[n - 1]);

    by_index
        .or_else(|| batch.iter().find(|b| b.id == text))
        .map(|b| (text, b))
}
