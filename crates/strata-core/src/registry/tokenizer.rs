use std::collections::BTreeSet;

/// Tokenizer families with a registered implementation.
#[derive(Debug, Clone, Default)]
pub struct TokenizerRegistry {
    families: BTreeSet<String>,
}

impl TokenizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Family names are matched case-insensitively.
    pub fn register(&mut self, family: impl AsRef<str>) {
        self.families.insert(family.as_ref().to_ascii_lowercase());
    }

    pub fn is_available(&self, family: &str) -> bool {
        self.families.contains(&family.to_ascii_lowercase())
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.families.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup() {
        let mut registry = TokenizerRegistry::new();
        registry.register("SentencePiece");
        assert!(registry.is_available("sentencepiece"));
        assert!(!registry.is_available("tiktoken"));
        assert_eq!(registry.families().collect::<Vec<_>>(), vec!["sentencepiece"]);
    }
}
