//! The `prefix` generator: a fixed prefix padded with random digits.
//!
//! Prone to name collisions by construction, which is why request validation
//! force-disables account reuse when this generator is selected.

use rand::Rng;

use crate::{GeneratorError, MAX_NAME_LEN};

/// Configuration for the prefix generator.
#[derive(Debug, Clone)]
pub struct PrefixConfig {
    /// Leading characters of every generated name.
    pub prefix: String,
    /// Total length of generated names, prefix included.
    pub length: usize,
}

pub struct PrefixGenerator {
    config: PrefixConfig,
}

impl PrefixGenerator {
    pub fn new(config: PrefixConfig) -> Result<Self, GeneratorError> {
        if config.length < 1 {
            return Err(GeneratorError::InvalidLength);
        }
        if config.length > MAX_NAME_LEN {
            return Err(GeneratorError::LongName);
        }
        if config.prefix.is_empty() {
            return Err(GeneratorError::InvalidPrefix);
        }
        if config.length < config.prefix.len() + 1 {
            return Err(GeneratorError::InvalidLength);
        }
        Ok(PrefixGenerator { config })
    }

    /// Generates `prefix` followed by random digits up to the configured
    /// length. Input data is ignored by this generator.
    pub fn generate(&self, _input: &[u8]) -> Result<String, GeneratorError> {
        let mut rng = rand::thread_rng();
        let mut name = self.config.prefix.clone();
        while name.len() < self.config.length {
            name.push(char::from(b'0' + rng.gen_range(0..10u8)));
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_configuration() {
        assert!(matches!(
            PrefixGenerator::new(PrefixConfig {
                prefix: String::new(),
                length: 10
            }),
            Err(GeneratorError::InvalidPrefix)
        ));
        assert!(matches!(
            PrefixGenerator::new(PrefixConfig {
                prefix: "AB".to_string(),
                length: 0
            }),
            Err(GeneratorError::InvalidLength)
        ));
        assert!(matches!(
            PrefixGenerator::new(PrefixConfig {
                prefix: "ABCDEFGH".to_string(),
                length: 8
            }),
            Err(GeneratorError::InvalidLength)
        ));
        assert!(matches!(
            PrefixGenerator::new(PrefixConfig {
                prefix: "AB".to_string(),
                length: 16
            }),
            Err(GeneratorError::LongName)
        ));
    }

    #[test]
    fn generates_padded_names() {
        let generator = PrefixGenerator::new(PrefixConfig {
            prefix: "WKS-".to_string(),
            length: 10,
        })
        .expect("generator");

        for _ in 0..32 {
            let name = generator.generate(b"ignored").expect("generate");
            assert_eq!(name.len(), 10);
            assert!(name.starts_with("WKS-"));
            assert!(name["WKS-".len()..].chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn names_vary() {
        let generator = PrefixGenerator::new(PrefixConfig {
            prefix: "W".to_string(),
            length: 15,
        })
        .expect("generator");
        let a = generator.generate(b"").expect("generate");
        let b = generator.generate(b"").expect("generate");
        // 14 random digits; a collision here means the RNG is broken.
        assert_ne!(a, b);
    }
}
