use std::fmt;

use crate::error::{Error, Result};

/// a namespaced signer label
///
/// the canonical encoding is `<namespace>::<contents>` (double colon, to be
/// distinguishable from a hash). The namespace selects the helper processes
/// used to sign and verify; the contents are opaque to the core.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    namespace: String,
    contents: String,
}

impl Identity {
    pub fn new(namespace: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            contents: contents.into(),
        }
    }

    /// parse the string encoding of an identity
    ///
    /// the empty string parses to `None`.
    pub fn parse(s: &str) -> Result<Option<Self>> {
        if s.is_empty() {
            return Ok(None);
        }
        let (namespace, contents) = s
            .split_once("::")
            .ok_or_else(|| Error::MalformedIdentity(s.to_string()))?;
        Ok(Some(Self {
            namespace: namespace.to_string(),
            contents: contents.to_string(),
        }))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.namespace, self.contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let id = Identity::parse("ed25519::alice@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(id.namespace(), "ed25519");
        assert_eq!(id.contents(), "alice@example.com");
        assert_eq!(id.to_string(), "ed25519::alice@example.com");
    }

    #[test]
    fn test_parse_empty_is_nil() {
        assert!(Identity::parse("").unwrap().is_none());
    }

    #[test]
    fn test_parse_missing_separator() {
        assert!(matches!(
            Identity::parse("ed25519:alice"),
            Err(Error::MalformedIdentity(_))
        ));
    }

    #[test]
    fn test_contents_may_contain_separator() {
        // split happens on the first `::` only
        let id = Identity::parse("ns::a::b").unwrap().unwrap();
        assert_eq!(id.namespace(), "ns");
        assert_eq!(id.contents(), "a::b");
    }
}
