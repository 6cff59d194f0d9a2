//! Prompt Builder System
//!
//! Standardized prompt construction for the categorization requests.
//!
//! ## Layout
//!
//! 1. **Role**: who the model is acting as
//! 2. **Objectives**: numbered goals
//! 3. **Context**: ordered key/value facts (batch size, existing folders)
//! 4. **Rules**: hard constraints, including the forbidden categories
//! 5. **Examples**: wrong/correct pairs
//! 6. **Input** and **Output Schema**: the numbered batch and the JSON shape
//!
//! Bookmarks are listed 1-based so the model can answer with the position
//! instead of echoing long store ids.

use crate::ai::validation::CategoryRules;
use crate::types::{BookmarkRecord, LearningHints};

/// System instruction shared by every request
pub const SYSTEM_PROMPT: &str = "You organize web bookmarks into a clean folder hierarchy. \
Respond with a single JSON array and nothing else.";

/// Longest title or URL forwarded to the model
const MAX_FIELD_CHARS: usize = 200;

/// Prompt section types
#[derive(Debug, Clone)]
pub enum PromptSection {
    Role { expertise: String, task: String },
    Objectives(Vec<String>),
    /// Ordered key/value pairs
    Context(Vec<(String, String)>),
    Text {
        header: Option<String>,
        content: String,
    },
    Code { language: String, content: String },
    Rules(Vec<String>),
    Examples { bad: Vec<String>, good: Vec<String> },
}

/// Prompt builder for consistent prompt construction
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, expertise: &str, task: &str) -> Self {
        self.sections.push(PromptSection::Role {
            expertise: expertise.to_string(),
            task: task.to_string(),
        });
        self
    }

    pub fn objectives(mut self, objectives: Vec<&str>) -> Self {
        self.sections.push(PromptSection::Objectives(
            objectives.into_iter().map(String::from).collect(),
        ));
        self
    }

    /// Add a context item, merging into the existing context section
    pub fn context_item(mut self, key: &str, value: &str) -> Self {
        let existing = self.sections.iter_mut().find_map(|s| match s {
            PromptSection::Context(items) => Some(items),
            _ => None,
        });
        match existing {
            Some(items) => items.push((key.to_string(), value.to_string())),
            None => self.sections.push(PromptSection::Context(vec![(
                key.to_string(),
                value.to_string(),
            )])),
        }
        self
    }

    pub fn section(mut self, header: &str, content: &str) -> Self {
        self.sections.push(PromptSection::Text {
            header: Some(header.to_string()),
            content: content.to_string(),
        });
        self
    }

    pub fn code(mut self, language: &str, content: &str) -> Self {
        self.sections.push(PromptSection::Code {
            language: language.to_string(),
            content: content.to_string(),
        });
        self
    }

    pub fn rules(mut self, rules: Vec<String>) -> Self {
        self.sections.push(PromptSection::Rules(rules));
        self
    }

    pub fn examples(mut self, bad: Vec<&str>, good: Vec<&str>) -> Self {
        self.sections.push(PromptSection::Examples {
            bad: bad.into_iter().map(String::from).collect(),
            good: good.into_iter().map(String::from).collect(),
        });
        self
    }

    /// Build the final prompt string
    pub fn build(self) -> String {
        let mut prompt = String::new();

        for section in self.sections {
            match section {
                PromptSection::Role { expertise, task } => {
                    prompt.push_str("<ROLE>\n");
                    prompt.push_str(&format!(
                        "You are an expert {} specializing in {}.\n",
                        expertise, task
                    ));
                    prompt.push_str("</ROLE>\n\n");
                }
                PromptSection::Objectives(objectives) => {
                    prompt.push_str("<OBJECTIVES>\n");
                    for (i, obj) in objectives.iter().enumerate() {
                        prompt.push_str(&format!("{}. {}\n", i + 1, obj));
                    }
                    prompt.push_str("</OBJECTIVES>\n\n");
                }
                PromptSection::Context(items) => {
                    prompt.push_str("# Context\n\n");
                    for (key, value) in items {
                        prompt.push_str(&format!("**{}**: {}\n", key, value));
                    }
                    prompt.push('\n');
                }
                PromptSection::Text { header, content } => {
                    if let Some(h) = header {
                        prompt.push_str(&format!("# {}\n\n", h));
                    }
                    prompt.push_str(&content);
                    prompt.push_str("\n\n");
                }
                PromptSection::Code { language, content } => {
                    prompt.push_str(&format!("```{}\n", language));
                    prompt.push_str(&content);
                    prompt.push_str("\n```\n\n");
                }
                PromptSection::Rules(rules) => {
                    prompt.push_str("<RULES>\n");
                    for rule in rules {
                        prompt.push_str(&format!("- {}\n", rule));
                    }
                    prompt.push_str("</RULES>\n\n");
                }
                PromptSection::Examples { bad, good } => {
                    for example in bad {
                        prompt.push_str(&format!("WRONG: {}\n", example));
                    }
                    for example in good {
                        prompt.push_str(&format!("CORRECT: {}\n", example));
                    }
                    prompt.push('\n');
                }
            }
        }

        prompt.trim_end().to_string()
    }
}

fn clip(text: &str) -> String {
    text.chars().take(MAX_FIELD_CHARS).collect()
}

/// Numbered `title | url` lines, 1-based
fn numbered_bookmarks(batch: &[BookmarkRecord]) -> String {
    batch
        .iter()
        .enumerate()
        .map(|(i, b)| format!("{}. {} | {}", i + 1, clip(&b.title), clip(&b.url)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn forbidden_rule(rules: &CategoryRules) -> String {
    let quoted: Vec<String> = rules.forbidden.iter().map(|f| format!("\"{}\"", f)).collect();
    format!(
        "Never use {} as a folder name or as the first path segment",
        quoted.join(" or ")
    )
}

/// Preset prompts for the two request kinds
pub struct PromptTemplates;

impl PromptTemplates {
    /// Assign every bookmark in `batch` to a folder path
    pub fn categorize(
        batch: &[BookmarkRecord],
        categories: &[String],
        hints: &LearningHints,
        rules: &CategoryRules,
    ) -> String {
        let mut builder = PromptBuilder::new()
            .role("librarian", "organizing web bookmarks into folders")
            .objectives(vec![
                "Assign every bookmark below to exactly one folder",
                "Prefer the existing folders when one fits",
                "Use at most two levels, separated by '/'",
            ])
            .context_item("Bookmarks", &batch.len().to_string());

        if !categories.is_empty() {
            builder = builder.context_item("Existing folders", &categories.join(", "));
        }

        builder = builder.rules(vec![
            forbidden_rule(rules),
            "Answer for every numbered bookmark, using its number as the id".to_string(),
            "Confidence is a number between 0 and 1".to_string(),
        ]);

        if !hints.is_empty() {
            let lines: Vec<String> = hints
                .hints
                .iter()
                .map(|h| format!("- \"{}\" belongs in {}", h.pattern, h.category))
                .collect();
            builder = builder.section("User Corrections", &lines.join("\n"));
        }

        builder
            .examples(
                vec![r#"{"id": 3, "category": "Other"}"#],
                vec![r#"{"id": 3, "category": "Reference/Documentation"}"#],
            )
            .section("Bookmarks", &numbered_bookmarks(batch))
            .section("Output Schema", "Return a JSON array of objects:")
            .code(
                "json",
                r#"[{"id": 1, "category": "Folder/Subfolder", "title": "Short title", "confidence": 0.9}]"#,
            )
            .build()
    }

    /// Propose folder names that fit a sample of bookmarks
    pub fn suggest_categories(
        sample: &[BookmarkRecord],
        max: usize,
        rules: &CategoryRules,
    ) -> String {
        PromptBuilder::new()
            .role("librarian", "designing bookmark folder structures")
            .objectives(vec![
                "Read the sample bookmarks",
                "Propose broad top-level folders that cover them",
            ])
            .context_item("Maximum folders", &max.to_string())
            .rules(vec![
                forbidden_rule(rules),
                "Each name is short and in title case".to_string(),
            ])
            .section("Bookmarks", &numbered_bookmarks(sample))
            .section("Output Schema", "Return a JSON array of strings:")
            .code("json", r#"["Development", "News", "Shopping"]"#)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LearningHint;

    fn batch() -> Vec<BookmarkRecord> {
        vec![
            BookmarkRecord::new("a", "Rust Book", "https://doc.rust-lang.org/book"),
            BookmarkRecord::new("b", "Hacker News", "https://news.ycombinator.com"),
        ]
    }

    #[test]
    fn test_basic_prompt() {
        let prompt = PromptBuilder::new()
            .role("librarian", "bookmarks")
            .objectives(vec!["Sort", "Name"])
            .build();

        assert!(prompt.contains("<ROLE>"));
        assert!(prompt.contains("1. Sort"));
        assert!(prompt.contains("2. Name"));
    }

    #[test]
    fn test_context_items_merge_in_order() {
        let prompt = PromptBuilder::new()
            .context_item("First", "1")
            .context_item("Second", "2")
            .build();

        assert_eq!(prompt.matches("# Context").count(), 1);
        assert!(prompt.find("**First**").unwrap() < prompt.find("**Second**").unwrap());
    }

    #[test]
    fn test_categorize_prompt() {
        let hints = LearningHints {
            hints: vec![LearningHint {
                pattern: "ycombinator".into(),
                category: "News".into(),
            }],
        };
        let prompt = PromptTemplates::categorize(
            &batch(),
            &["Development".to_string()],
            &hints,
            &CategoryRules::default(),
        );

        assert!(prompt.contains("1. Rust Book | https://doc.rust-lang.org/book"));
        assert!(prompt.contains("2. Hacker News"));
        assert!(prompt.contains("Never use \"Other\""));
        assert!(prompt.contains("**Existing folders**: Development"));
        assert!(prompt.contains("\"ycombinator\" belongs in News"));
        assert!(prompt.contains("```json"));
    }

    #[test]
    fn test_long_fields_clipped() {
        let long = BookmarkRecord::new("x", "t".repeat(500), "https://example.com");
        let prompt =
            PromptTemplates::suggest_categories(&[long], 5, &CategoryRules::default());
        assert!(!prompt.contains(&"t".repeat(MAX_FIELD_CHARS + 1)));
        assert!(prompt.contains("**Maximum folders**: 5"));
    }
}
