use serde::{Deserialize, Serialize};

/// Ordered record of the kernel URIs a command or event has passed through.
///
/// Stamping is idempotent: a URI is recorded once, at the position where it
/// was first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingSlip(Vec<String>);

impl RoutingSlip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the URI was not already present.
    pub fn stamp(&mut self, uri: impl AsRef<str>) -> bool {
        let uri = uri.as_ref();
        if self.contains(uri) {
            return false;
        }
        self.0.push(uri.to_string());
        true
    }

    pub fn contains(&self, uri: impl AsRef<str>) -> bool {
        let uri = uri.as_ref();
        self.0.iter().any(|u| u == uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}

impl From<Vec<String>> for RoutingSlip {
    fn from(uris: Vec<String>) -> Self {
        let mut slip = RoutingSlip::new();
        for uri in uris {
            slip.stamp(uri);
        }
        slip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamping_is_idempotent() {
        let mut slip = RoutingSlip::new();
        assert!(slip.stamp("kernel://a/csharp"));
        assert!(!slip.stamp("kernel://a/csharp"));
        assert!(slip.stamp("kernel://a"));
        assert!(!slip.stamp("kernel://a/csharp"));
        assert_eq!(slip.len(), 2);
        assert!(slip.contains("kernel://a/csharp"));
        assert_eq!(
            slip.iter().collect::<Vec<_>>(),
            vec!["kernel://a/csharp", "kernel://a"]
        );
    }

    #[test]
    fn wire_form_drops_duplicates() {
        let slip = RoutingSlip::from(vec![
            "kernel://a".to_string(),
            "kernel://b".to_string(),
            "kernel://a".to_string(),
        ]);
        assert_eq!(slip.to_vec(), vec!["kernel://a", "kernel://b"]);
    }
}
