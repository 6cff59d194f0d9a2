//! Model Response Parsing and Validation
//!
//! Turns raw model text into bookmark assignments:
//! - JSON array extraction and repair for fenced or truncated output
//! - Batch mapping with category rules
//!
//! ## Failure Routing
//! - `Truncated`: the fallback cascade splits the batch and retries
//! - `Parse`: moves on to the next model
//! - `Validation`: the batch violates the category rules

mod json_repair;
mod response;

pub use json_repair::{JsonRepairer, RepairedArray};
pub use response::{
    CategoryRules, DEFAULT_CONFIDENCE, IssueSeverity, ResponseValidator, ValidationIssue,
    ValidationResult, normalize_category,
};

use tracing::{debug, warn};

use crate::types::{BookmarkRecord, CategorizedBookmark, MarksortError, Result};

/// Repair, parse, and validate model responses
#[derive(Default)]
pub struct ResponseRepairParser {
    repairer: JsonRepairer,
    validator: ResponseValidator,
}

impl ResponseRepairParser {
    pub fn new(rules: CategoryRules) -> Self {
        Self {
            repairer: JsonRepairer::new(),
            validator: ResponseValidator::new(rules),
        }
    }

    pub fn rules(&self) -> &CategoryRules {
        self.validator.rules()
    }

    /// Parse a categorization response for `batch`.
    ///
    /// A repaired response that no longer covers the whole batch is reported
    /// as `Truncated` so the caller can split the batch. So is a cut-off
    /// element whose category did not arrive whole.
    pub fn parse_categorizations(
        &self,
        raw: &str,
        batch: &[BookmarkRecord],
    ) -> Result<Vec<CategorizedBookmark>> {
        let parsed = self.repairer.parse_array(raw)?;
        if parsed.last_partial
            && parsed
                .items
                .last()
                .and_then(response::raw_category)
                .is_none()
        {
            return Err(MarksortError::Truncated(
                "response ends before the last category is complete".to_string(),
            ));
        }
        let result = self.validator.categorizations(&parsed.items, batch)?;

        for issue in &result.issues {
            debug!("Response issue: {}", issue);
        }

        if parsed.was_repaired && result.items.len() < batch.len() {
            return Err(MarksortError::Truncated(format!(
                "repaired response covers {} of {} bookmarks",
                result.items.len(),
                batch.len()
            )));
        }

        if result.items.len() < batch.len() {
            warn!(
                "Model assigned {} of {} bookmarks",
                result.items.len(),
                batch.len()
            );
        }
        Ok(result.items)
    }

    /// Parse a folder-name suggestion response
    pub fn parse_category_names(&self, raw: &str, max: usize) -> Result<Vec<String>> {
        let parsed = self.repairer.parse_array(raw)?;
        let names = self.validator.category_names(&parsed.items, max);
        if names.is_empty() {
            return Err(MarksortError::Validation(
                "no usable category names in response".to_string(),
            ));
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(n: usize) -> Vec<BookmarkRecord> {
        (1..=n)
            .map(|i| BookmarkRecord::new(format!("b{i}"), format!("Site {i}"), format!("https://{i}.example")))
            .collect()
    }

    #[test]
    fn test_fenced_response() {
        let parser = ResponseRepairParser::default();
        let raw = "```json\n[{\"id\": 1, \"category\": \"Dev\"}, {\"id\": 2, \"category\": \"Other\"}]\n```";
        let items = parser.parse_categorizations(raw, &batch(2)).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].category, "Miscellaneous");
    }

    #[test]
    fn test_truncated_partial_coverage_reported() {
        let parser = ResponseRepairParser::default();
        let raw = r#"[{"id": 1, "category": "Dev"}, {"id": 2, "categ"#;
        let err = parser.parse_categorizations(raw, &batch(2)).unwrap_err();
        assert!(err.is_truncation());
    }

    #[test]
    fn test_cut_off_category_is_truncation() {
        let parser = ResponseRepairParser::default();
        let raw = r#"[{"id": 1, "category": "Programming/Ru"#;
        let err = parser.parse_categorizations(raw, &batch(1)).unwrap_err();
        assert!(err.is_truncation(), "got {err}");
    }

    #[test]
    fn test_cut_off_element_with_whole_category_accepted() {
        let parser = ResponseRepairParser::default();
        let raw = r#"[{"id": 1, "category": "Programming/Rust", "confidence": 0.9"#;
        let items = parser.parse_categorizations(raw, &batch(1)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].category, "Programming/Rust");
    }

    #[test]
    fn test_truncation_repair_covering_batch_accepted() {
        let parser = ResponseRepairParser::default();
        let raw = r#"[{"id": 1, "category": "Dev"}, {"id": 2, "category": "News"}"#;
        let items = parser.parse_categorizations(raw, &batch(2)).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_unrepaired_partial_coverage_accepted() {
        let parser = ResponseRepairParser::default();
        let raw = r#"[{"id": 2, "category": "News"}]"#;
        let items = parser.parse_categorizations(raw, &batch(3)).unwrap();
        assert_eq!(items[0].bookmark_id, "b2");
    }

    #[test]
    fn test_category_names() {
        let parser = ResponseRepairParser::default();
        let names = parser
            .parse_category_names(r#"["Development", "News", "Other"]"#, 10)
            .unwrap();
        assert_eq!(names, vec!["Development", "News"]);
        assert!(parser.parse_category_names(r#"["Other"]"#, 10).is_err());
    }
}
