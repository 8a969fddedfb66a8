use std::collections::BTreeMap;

/// Message header fields with case-insensitive keys.
///
/// The spelling of a key as first inserted is kept for encoding; fields
/// iterate in case-insensitive key order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    fields: BTreeMap<String, (String, String)>,
}

impl Header {
    /// Creates an empty header.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, returning this header.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();

        match self.fields.get_mut(&key.to_lowercase()) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.fields.insert(key.to_lowercase(), (key, value));
                None
            }
        }
    }

    /// The value of `key`, ignoring case.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(&key.to_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Removes `key`, ignoring case.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.fields
            .remove(&key.to_lowercase())
            .map(|(_, value)| value)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields as `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Header
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut header = Self::new();
        for (key, value) in iter {
            header.insert(key, value);
        }
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_ignore_case() {
        let mut header = Header::new().with("Authorization", "a r");
        assert_eq!(header.get("authorization"), Some("a r"));
        assert_eq!(header.get("AUTHORIZATION"), Some("a r"));

        assert_eq!(
            header.insert("AUTHORIZATION", "b r"),
            Some("a r".to_owned())
        );
        assert_eq!(header.len(), 1);
        assert_eq!(header.iter().collect::<Vec<_>>(), vec![("Authorization", "b r")]);

        assert_eq!(header.remove("authorization"), Some("b r".to_owned()));
        assert!(header.is_empty());
    }

    #[test]
    fn test_iteration_is_case_insensitively_sorted() {
        let header: Header = [("b", "2"), ("A", "1"), ("c", "3")].into_iter().collect();
        let keys: Vec<_> = header.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["A", "b", "c"]);
    }
}
