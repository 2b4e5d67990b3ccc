//! HTTP/2 header blocks
//!
//! A header block is an ordered list of name/value pairs as carried by a
//! HEADERS frame (and its CONTINUATION frames). The same type is used for
//! request headers, response headers and trailers.

use std::fmt;

/// Pseudo-header carrying the response status
pub const STATUS: &str = ":status";

/// An ordered header block
///
/// Headers are stored in arrival order and support:
/// - Case-insensitive name lookups
/// - Multiple values for the same name
/// - Pseudo-headers (names starting with `:`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header block
    pub fn new() -> Self {
        Headers { fields: Vec::new() }
    }

    /// Append a field, keeping any existing values for the same name
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Builder-style variant of [`Headers::insert`]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// First value for a name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for a name (case-insensitive)
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Numeric value of the `:status` pseudo-header, if present and valid
    pub fn status(&self) -> Option<u16> {
        self.get(STATUS).and_then(|s| s.trim().parse().ok())
    }

    /// Whether this block is an interim (1xx) response
    ///
    /// Interim responses do not count as the response header block of a
    /// stream.
    pub fn is_informational(&self) -> bool {
        matches!(self.status(), Some(100..=199))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over all fields in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Headers {
            fields: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut headers = Headers::new();
        headers.insert("content-type", "text/html");
        headers.insert("content-length", "42");

        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(headers.get("content-length"), Some("42"));
        assert_eq!(headers.get("missing"), None);
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_multiple_values_keep_order() {
        let headers = Headers::new()
            .with("set-cookie", "a=1")
            .with("x-other", "y")
            .with("set-cookie", "b=2");

        assert_eq!(headers.get_all("set-cookie"), vec!["a=1", "b=2"]);
        assert_eq!(headers.get("set-cookie"), Some("a=1"));
        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["set-cookie", "x-other", "set-cookie"]);
    }

    #[test]
    fn test_status_and_informational() {
        let interim = Headers::new().with(":status", "100");
        assert_eq!(interim.status(), Some(100));
        assert!(interim.is_informational());

        let ok = Headers::new().with(":status", "200");
        assert!(!ok.is_informational());

        let trailers = Headers::new().with("grpc-status", "0");
        assert_eq!(trailers.status(), None);
        assert!(!trailers.is_informational());
    }

    #[test]
    fn test_from_iter() {
        let headers: Headers = vec![(":status", "204"), ("server", "h2stream")]
            .into_iter()
            .collect();
        assert!(headers.contains("Server"));
        assert_eq!(headers.status(), Some(204));
    }
}
