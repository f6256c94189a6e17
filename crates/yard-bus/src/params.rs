//! Ordered string parameters.
//!
//! Messages carry their parameters as an ordered multimap: insertion
//! order is retained, duplicate names are allowed, and lookups return the
//! first match. This mirrors how header lists behave on the wire, which
//! is where most of these parameters come from and go back to.

/// An ordered list of `name = value` string pairs.
///
/// Names are matched exactly (parameter names are produced by the core
/// and by handlers, not parsed off the wire, so no case folding happens
/// here).
#[derive(Debug, Clone, Default)]
pub struct Params {
    items: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value recorded under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// First value under `name`, or `default` when absent.
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    /// First value under `name` parsed as an integer.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    /// First value under `name` read as a boolean.
    ///
    /// Accepts `true`/`yes`/`on`/`1` and `false`/`no`/`off`/`0`; anything
    /// else is treated as absent.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)?.trim() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }

    /// Replace the first value under `name`, or append when absent.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.items.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.items.push((name.to_string(), value.to_string())),
        }
    }

    /// Append a pair, keeping any existing values under the same name.
    pub fn add(&mut self, name: &str, value: &str) {
        self.items.push((name.to_string(), value.to_string()));
    }

    /// Remove every value recorded under `name`.
    pub fn clear(&mut self, name: &str) {
        self.items.retain(|(n, _)| n != name);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins() {
        let mut p = Params::new();
        p.add("hdr_Accept", "text/html");
        p.add("hdr_Accept", "text/plain");
        assert_eq!(p.get("hdr_Accept"), Some("text/html"));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn set_replaces_only_first() {
        let mut p = Params::new();
        p.add("a", "1");
        p.add("a", "2");
        p.set("a", "3");
        let all: Vec<_> = p.iter().filter(|(n, _)| *n == "a").collect();
        assert_eq!(all, vec![("a", "3"), ("a", "2")]);
    }

    #[test]
    fn insertion_order_is_kept() {
        let mut p = Params::new();
        p.add("z", "1");
        p.add("a", "2");
        p.add("m", "3");
        let names: Vec<_> = p.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn typed_getters() {
        let mut p = Params::new();
        p.set("port", "5038");
        p.set("nodelay", "yes");
        p.set("broken", "many");
        assert_eq!(p.get_u64("port"), Some(5038));
        assert_eq!(p.get_bool("nodelay"), Some(true));
        assert_eq!(p.get_u64("broken"), None);
        assert_eq!(p.get_bool("broken"), None);
        assert_eq!(p.get_or("missing", "x"), "x");
    }
}
