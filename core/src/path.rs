use std::fmt;

/// Key under which every mounted fragment, subscriber and tag target is wrapped,
/// so a single top-level reducer needs no special casing.
pub const ROOT_KEY: &str = "root";

/// The sequence of keys from the top of a tree to one of its nodes.
///
/// Renders as a dot path (`root.foo.bar`); the empty path renders as `(top)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyPath(Vec<String>);

impl KeyPath {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// A new path one level below this one.
    pub fn child(&self, key: &str) -> Self {
        let mut keys = self.0.clone();
        keys.push(key.to_string());
        Self(keys)
    }

    pub fn keys(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The same path with a leading `prefix` key removed, if present.
    pub fn strip_prefix(&self, prefix: &str) -> Option<Self> {
        match self.0.split_first() {
            Some((first, rest)) if first == prefix => Some(Self(rest.to_vec())),
            _ => None,
        }
    }
}

impl<S: Into<String>> FromIterator<S> for KeyPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("(top)")
        } else {
            f.write_str(&self.0.join("."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let path = KeyPath::new().child("root").child("foo");
        assert_eq!(path.to_string(), "root.foo");
        assert_eq!(KeyPath::new().to_string(), "(top)");
    }

    #[test]
    fn test_strip_prefix() {
        let path: KeyPath = ["root", "a", "b"].into_iter().collect();
        assert_eq!(path.strip_prefix(ROOT_KEY).map(|p| p.to_string()), Some("a.b".into()));
        assert!(path.strip_prefix("other").is_none());
    }
}
