//! Domain set keyed on reversed labels.
//!
//! "www.facebook.com" is stored along the path `com -> facebook -> www`, so a
//! lookup walking the host's labels from the most significant end passes
//! through every ancestor domain. Matching is label-granular: "facebook.com"
//! never matches "notfacebook.com".

use std::collections::BTreeMap;

use crate::types::host_only;

#[derive(Debug, Clone, Default)]
struct Node {
    /// Marks a stored domain ending at this node
    terminal: bool,
    children: BTreeMap<String, Node>,
}

impl Node {
    fn is_prunable(&self) -> bool {
        !self.terminal && self.children.is_empty()
    }
}

/// Domain matcher supporting exact and subdomain lookups.
#[derive(Debug, Clone, Default)]
pub struct DomainMatcher {
    root: Node,
    len: usize,
}

impl DomainMatcher {
    /// Create an empty matcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `host`. The port, if any, is stripped. Idempotent.
    pub fn add(&mut self, host: &str) {
        let host = host_only(host);
        if host.is_empty() {
            return;
        }

        let mut node = &mut self.root;
        for label in host.rsplit('.') {
            node = node.children.entry(label.to_string()).or_default();
        }
        if !node.terminal {
            node.terminal = true;
            self.len += 1;
        }
    }

    /// Remove the exact entry for `host`. Returns whether it was present.
    ///
    /// Subdomains stored separately are left alone.
    pub fn delete(&mut self, host: &str) -> bool {
        let host = host_only(host);
        if host.is_empty() {
            return false;
        }

        let labels: Vec<&str> = host.rsplit('.').collect();
        let removed = remove_path(&mut self.root, &labels);
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// True iff `host` itself was inserted.
    pub fn contains_exactly(&self, host: &str) -> bool {
        let host = host_only(host);
        if host.is_empty() {
            return false;
        }

        let mut node = &self.root;
        for label in host.rsplit('.') {
            match node.children.get(label) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.terminal
    }

    /// True iff `host` or any of its parent domains was inserted.
    pub fn matches_prefix(&self, host: &str) -> bool {
        let host = host_only(host);
        if host.is_empty() {
            return false;
        }

        let mut node = &self.root;
        for label in host.rsplit('.') {
            match node.children.get(label) {
                Some(child) if child.terminal => return true,
                Some(child) => node = child,
                None => return false,
            }
        }
        false
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the matcher is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.root = Node::default();
        self.len = 0;
    }

    /// Stored hosts in normal label order, ordered by their reversed form.
    pub fn iter(&self) -> impl Iterator<Item = String> {
        let mut out = Vec::with_capacity(self.len);
        let mut path = Vec::new();
        collect(&self.root, &mut path, &mut out);
        out.into_iter()
    }
}

impl<S: AsRef<str>> FromIterator<S> for DomainMatcher {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut matcher = Self::new();
        for host in iter {
            matcher.add(host.as_ref());
        }
        matcher
    }
}

/// Clear the terminal flag at the end of `labels`, pruning emptied branches.
fn remove_path(node: &mut Node, labels: &[&str]) -> bool {
    let Some((first, rest)) = labels.split_first() else {
        let was_terminal = node.terminal;
        node.terminal = false;
        return was_terminal;
    };

    let Some(child) = node.children.get_mut(*first) else {
        return false;
    };
    let removed = remove_path(child, rest);
    if removed && child.is_prunable() {
        node.children.remove(*first);
    }
    removed
}

fn collect<'a>(node: &'a Node, path: &mut Vec<&'a str>, out: &mut Vec<String>) {
    if node.terminal {
        let host: Vec<&str> = path.iter().rev().copied().collect();
        out.push(host.join("."));
    }
    for (label, child) in &node.children {
        path.push(label.as_str());
        collect(child, path, out);
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_matcher() {
        let matcher = DomainMatcher::new();
        assert!(matcher.is_empty());
        assert!(!matcher.matches_prefix("google.com"));
        assert!(!matcher.contains_exactly("google.com"));
        assert!(!matcher.matches_prefix(""));
    }

    #[test]
    fn test_subdomain_match() {
        let mut matcher = DomainMatcher::new();
        matcher.add("facebook.com");

        assert!(matcher.matches_prefix("facebook.com"));
        assert!(matcher.matches_prefix("www.facebook.com"));
        assert!(matcher.matches_prefix("sub.facebook.com"));
        assert!(matcher.matches_prefix("a.b.c.facebook.com"));
    }

    #[test]
    fn test_label_boundaries() {
        let mut matcher = DomainMatcher::new();
        matcher.add("facebook.com");

        assert!(!matcher.matches_prefix("notfacebook.com"));
        assert!(!matcher.matches_prefix("facebookx.com"));
        assert!(!matcher.matches_prefix("facebook.com.evil.org"));
        assert!(!matcher.matches_prefix("com"));
    }

    #[test]
    fn test_contains_exactly_ignores_subdomains() {
        let mut matcher = DomainMatcher::new();
        matcher.add("example.com");

        assert!(matcher.contains_exactly("example.com"));
        assert!(!matcher.contains_exactly("www.example.com"));
        assert!(!matcher.contains_exactly("com"));
    }

    #[test]
    fn test_parent_of_entry_does_not_match() {
        let mut matcher = DomainMatcher::new();
        matcher.add("www.example.com");

        assert!(!matcher.matches_prefix("example.com"));
        assert!(matcher.matches_prefix("img.www.example.com"));
    }

    #[test]
    fn test_port_and_case_normalized() {
        let mut matcher = DomainMatcher::new();
        matcher.add("Example.COM:443");

        assert!(matcher.contains_exactly("example.com"));
        assert!(matcher.matches_prefix("WWW.example.com:80"));
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut matcher = DomainMatcher::new();
        matcher.add("a.com");
        matcher.add("a.com");
        matcher.add("a.com:80");
        assert_eq!(matcher.len(), 1);
    }

    #[test]
    fn test_delete() {
        let mut matcher = DomainMatcher::new();
        matcher.add("example.com");
        matcher.add("www.example.com");

        assert!(matcher.delete("example.com"));
        assert!(!matcher.delete("example.com"));
        assert!(!matcher.contains_exactly("example.com"));
        assert!(matcher.contains_exactly("www.example.com"));
        assert!(!matcher.matches_prefix("api.example.com"));
        assert_eq!(matcher.len(), 1);

        assert!(matcher.delete("www.example.com"));
        assert!(matcher.is_empty());
        assert!(matcher.root.children.is_empty());
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut matcher = DomainMatcher::new();
        matcher.add("example.com");
        assert!(!matcher.delete("www.example.com"));
        assert!(!matcher.delete("other.org"));
        assert_eq!(matcher.len(), 1);
    }

    #[test]
    fn test_ip_literal_is_a_host() {
        let mut matcher = DomainMatcher::new();
        matcher.add("127.0.0.1:80");
        assert!(matcher.contains_exactly("127.0.0.1"));
        assert!(matcher.matches_prefix("127.0.0.1:4325"));
        assert!(!matcher.matches_prefix("127.0.0.2"));
    }

    #[test]
    fn test_iter_and_from_iter() {
        let matcher: DomainMatcher = ["b.com", "a.com", "www.a.com", "a.org"]
            .into_iter()
            .collect();
        let hosts: Vec<String> = matcher.iter().collect();
        assert_eq!(hosts, vec!["a.com", "www.a.com", "b.com", "a.org"]);
    }

    #[test]
    fn test_clear() {
        let mut matcher: DomainMatcher = ["a.com", "b.com"].into_iter().collect();
        matcher.clear();
        assert!(matcher.is_empty());
        assert!(!matcher.matches_prefix("a.com"));
    }
}
