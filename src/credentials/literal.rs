//! Literal provider
//!
//! Lowest priority. Plaintext warnings are emitted by the config loader, not here.

use super::{CredentialProvider, CredentialReference};
use crate::error::{Result, SherlockError};

#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralProvider;

impl CredentialProvider for LiteralProvider {
    fn name(&self) -> &'static str {
        "literal"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn can_resolve(&self, reference: &CredentialReference) -> bool {
        reference.is_literal()
    }

    fn resolve(&self, reference: &CredentialReference) -> Result<String> {
        match reference {
            CredentialReference::Literal(value) => Ok(value.clone()),
            _ => Err(SherlockError::invalid_input("literal provider only resolves string values")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_value_unchanged() {
        let value = LiteralProvider.resolve(&CredentialReference::literal("  a b  ")).unwrap();
        assert_eq!(value, "  a b  ");
    }

    #[test]
    fn test_rejects_non_literal() {
        assert!(!LiteralProvider.can_resolve(&CredentialReference::env("X")));
        assert!(LiteralProvider.resolve(&CredentialReference::env("X")).is_err());
    }
}
