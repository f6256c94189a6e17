//! Ordered header map.

/// An ordered list of header `name: value` pairs.
///
/// Names compare case-insensitively on lookup; insertion order and
/// duplicates are preserved so serialization reproduces what was parsed.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    items: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value under `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Append a header, keeping any existing values under the same name.
    pub fn add(&mut self, name: &str, value: &str) {
        self.items.push((name.to_string(), value.to_string()));
    }

    /// Replace the first header matching `name`, or append when absent.
    pub fn set(&mut self, name: &str, value: &str) {
        match self
            .items
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.add(name, value),
        }
    }

    /// All pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
