//! Server-side hostname generation.
//!
//! Generators are selected per request by `GeneratorID`. The registry is
//! built once at startup from configuration and immutable afterwards; the
//! broker consults it to validate requested generator names, the joiner to
//! produce the actual name.

mod prefix;

pub use prefix::{PrefixConfig, PrefixGenerator};

use std::collections::BTreeMap;

/// Names greater than 15 characters may fail to join.
pub const MAX_NAME_LEN: usize = 15;

/// Generator names accepted by the broker's request validation.
pub fn builtin_names() -> Vec<String> {
    vec!["prefix".to_string()]
}

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("generator {0:?} is not registered")]
    Unknown(String),
    #[error("prefix generator requires a naming length greater than the specified prefix")]
    InvalidLength,
    #[error("prefix generator requires a prefix string")]
    InvalidPrefix,
    #[error("names greater than {MAX_NAME_LEN} characters may fail to join")]
    LongName,
}

/// A configured hostname generator.
pub enum Generator {
    Prefix(PrefixGenerator),
}

impl Generator {
    /// Produces a hostname. `input` carries the request's generator-specific
    /// payload, which a generator is free to ignore.
    pub fn generate(&self, input: &[u8]) -> Result<String, GeneratorError> {
        match self {
            Generator::Prefix(p) => p.generate(input),
        }
    }
}

/// Immutable registry of configured generators, keyed by GeneratorID.
#[derive(Default)]
pub struct Registry {
    generators: BTreeMap<String, Generator>,
}

impl Registry {
    /// An empty registry; requests naming any generator will fail.
    pub fn empty() -> Self {
        Registry::default()
    }

    /// Builds the registry from configuration. Currently the only supported
    /// generator is `prefix`.
    pub fn from_config(prefix: Option<PrefixConfig>) -> Result<Self, GeneratorError> {
        let mut generators = BTreeMap::new();
        if let Some(config) = prefix {
            generators.insert(
                "prefix".to_string(),
                Generator::Prefix(PrefixGenerator::new(config)?),
            );
        }
        Ok(Registry { generators })
    }

    /// Registered generator names.
    pub fn names(&self) -> Vec<String> {
        self.generators.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }

    /// Runs the named generator.
    pub fn generate(&self, name: &str, input: &[u8]) -> Result<String, GeneratorError> {
        self.generators
            .get(name)
            .ok_or_else(|| GeneratorError::Unknown(name.to_string()))?
            .generate(input)
    }
}
