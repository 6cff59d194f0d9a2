//! Model Catalog
//!
//! Static model lists per provider with a capability weight used to order the
//! fallback cascade. Explicit parameter counts (billions) are used where
//! published; otherwise a coarse size class stands in.

use serde::{Deserialize, Serialize};

use crate::types::Provider;

/// Coarse model size
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
    Ultra,
}

impl SizeClass {
    pub fn weight(&self) -> f64 {
        match self {
            SizeClass::Ultra => 1000.0,
            SizeClass::Large => 500.0,
            SizeClass::Medium => 100.0,
            SizeClass::Small => 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Parameter count in billions
    Params(f64),
    Size(SizeClass),
}

impl Capability {
    pub fn weight(&self) -> f64 {
        match self {
            Capability::Params(billions) => *billions,
            Capability::Size(class) => class.weight(),
        }
    }
}

/// One model the cascade may try
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub provider: Provider,
    pub model: String,
    pub capability: Capability,
}

impl ModelCandidate {
    pub fn new(provider: Provider, model: impl Into<String>, capability: Capability) -> Self {
        Self {
            provider,
            model: model.into(),
            capability,
        }
    }

    pub fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

impl std::fmt::Display for ModelCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

const BUILTIN_MODELS: &[(Provider, &str, Capability)] = &[
    (Provider::Gemini, "gemini-2.5-pro", Capability::Size(SizeClass::Ultra)),
    (Provider::Gemini, "gemini-2.5-flash", Capability::Size(SizeClass::Large)),
    (Provider::Gemini, "gemini-2.0-flash", Capability::Size(SizeClass::Medium)),
    (Provider::Gemini, "gemini-2.0-flash-lite", Capability::Size(SizeClass::Small)),
    (Provider::OpenAi, "gpt-4.1", Capability::Size(SizeClass::Ultra)),
    (Provider::OpenAi, "gpt-4o", Capability::Size(SizeClass::Large)),
    (Provider::OpenAi, "gpt-4o-mini", Capability::Size(SizeClass::Medium)),
    (Provider::Anthropic, "claude-sonnet-4-0", Capability::Size(SizeClass::Ultra)),
    (Provider::Anthropic, "claude-3-5-haiku-latest", Capability::Size(SizeClass::Medium)),
    (Provider::Groq, "llama-3.3-70b-versatile", Capability::Params(70.0)),
    (Provider::Groq, "llama-3.1-8b-instant", Capability::Params(8.0)),
];

/// Immutable list of known models
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<ModelCandidate>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelCatalog {
    pub fn new(entries: Vec<ModelCandidate>) -> Self {
        Self { entries }
    }

    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_MODELS
                .iter()
                .map(|(p, m, c)| ModelCandidate::new(*p, *m, *c))
                .collect(),
        )
    }

    pub fn entries(&self) -> &[ModelCandidate] {
        &self.entries
    }

    /// Models of available providers, strongest first. Ties keep catalog order.
    pub fn candidates(&self, available: impl Fn(Provider) -> bool) -> Vec<ModelCandidate> {
        let mut list: Vec<ModelCandidate> = self
            .entries
            .iter()
            .filter(|c| available(c.provider))
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.capability
                .weight()
                .partial_cmp(&a.capability.weight())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        list
    }
}
