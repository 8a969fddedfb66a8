//! A level-keyed tree of `pattern -> value` entries with two query modes.
//!
//! Patterns are stored by walking their levels literally; wildcards are only
//! interpreted at query time:
//!
//! - [`PatternIndex::most_specific`] picks a single winner, preferring an
//!   exact level over `+` over `#`, deepest first. Access control uses this.
//! - [`PatternIndex::all_matches`] returns every stored pattern covering the
//!   query. Subscription fan-out uses this.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use indexmap::IndexMap;
use rxp_name::{MULTI_LEVEL_WILDCARD, ResourceName, SINGLE_LEVEL_WILDCARD, is_wildcard};

type Entry<V> = (ResourceName, V);

struct Node<V> {
    /// Patterns ending at this depth, keyed by their last level.
    entries: IndexMap<String, Entry<V>>,
    /// Subtrees for longer patterns, keyed by the level at this depth.
    children: IndexMap<String, Node<V>>,
}

impl<V> Node<V> {
    fn new() -> Self {
        Self {
            entries: IndexMap::new(),
            children: IndexMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.children.is_empty()
    }
}

/// Pattern-keyed storage supporting most-specific and all-matches lookups.
pub struct PatternIndex<V> {
    root: Node<V>,
    len: usize,
}

impl<V> Default for PatternIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: std::fmt::Debug> std::fmt::Debug for PatternIndex<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

impl<V> PatternIndex<V> {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::new(),
            len: 0,
        }
    }

    /// Number of stored patterns.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True if nothing is stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value` under `pattern`, returning the value it replaced.
    pub fn insert(&mut self, pattern: ResourceName, value: V) -> Option<V> {
        let (last, parents) = split_last(&pattern);

        let mut node = &mut self.root;
        for level in parents {
            node = node.children.entry(level.clone()).or_insert_with(Node::new);
        }

        let previous = node
            .entries
            .insert(last.to_owned(), (pattern, value))
            .map(|(_, previous)| previous);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Removes the entry stored under exactly `pattern`.
    pub fn remove(&mut self, pattern: &ResourceName) -> Option<V> {
        let removed = remove_at(&mut self.root, pattern.levels());
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// The value stored under exactly `pattern`.
    #[must_use]
    pub fn get(&self, pattern: &ResourceName) -> Option<&V> {
        let (last, parents) = split_last(pattern);

        let mut node = &self.root;
        for level in parents {
            node = node.children.get(level)?;
        }
        node.entries.get(last).map(|(_, value)| value)
    }

    /// Mutable access to the value stored under exactly `pattern`.
    pub fn get_mut(&mut self, pattern: &ResourceName) -> Option<&mut V> {
        let (last, parents) = split_last(pattern);

        let mut node = &mut self.root;
        for level in parents {
            node = node.children.get_mut(level)?;
        }
        node.entries.get_mut(last).map(|(_, value)| value)
    }

    /// Every stored pair, depth first, in insertion order within a node.
    #[must_use]
    pub fn entries(&self) -> Vec<(&ResourceName, &V)> {
        let mut out = Vec::with_capacity(self.len);
        collect_entries(&self.root, &mut out);
        out
    }

    /// Keeps only the entries for which `keep` returns true, pruning
    /// subtrees left empty.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&ResourceName, &mut V) -> bool,
    {
        let removed = retain_at(&mut self.root, &mut keep);
        self.len -= removed;
    }

    /// The single most specific stored pattern covering `name`.
    ///
    /// At each depth the exact level is preferred over `+`, and a deeper
    /// `#` over a shallower one.
    #[must_use]
    pub fn most_specific(&self, name: &ResourceName) -> Option<(&ResourceName, &V)> {
        most_specific_at(&self.root, name.levels(), 0).map(|(pattern, value)| (pattern, value))
    }

    /// Every stored pattern covering `name`, without precedence.
    #[must_use]
    pub fn all_matches(&self, name: &ResourceName) -> Vec<(&ResourceName, &V)> {
        let mut out = Vec::new();
        all_matches_at(&self.root, name.levels(), 0, &mut out);
        out
    }
}

fn split_last(name: &ResourceName) -> (&str, &[String]) {
    match name.levels().split_last() {
        Some((last, parents)) => (last.as_str(), parents),
        None => ("", &[]),
    }
}

fn remove_at<V>(node: &mut Node<V>, levels: &[String]) -> Option<V> {
    match levels {
        [] => None,
        [last] => node.entries.shift_remove(last).map(|(_, value)| value),
        [level, rest @ ..] => {
            let child = node.children.get_mut(level)?;
            let removed = remove_at(child, rest);
            if removed.is_some() && child.is_empty() {
                node.children.shift_remove(level);
            }
            removed
        }
    }
}

fn retain_at<V, F>(node: &mut Node<V>, keep: &mut F) -> usize
where
    F: FnMut(&ResourceName, &mut V) -> bool,
{
    let before = node.entries.len();
    node.entries.retain(|_, (pattern, value)| keep(pattern, value));
    let mut removed = before - node.entries.len();

    for child in node.children.values_mut() {
        removed += retain_at(child, keep);
    }
    node.children.retain(|_, child| !child.is_empty());

    removed
}

fn collect_entries<'a, V>(node: &'a Node<V>, out: &mut Vec<(&'a ResourceName, &'a V)>) {
    out.extend(node.entries.values().map(|(pattern, value)| (pattern, value)));
    for child in node.children.values() {
        collect_entries(child, out);
    }
}

fn most_specific_at<'a, V>(
    node: &'a Node<V>,
    levels: &[String],
    depth: usize,
) -> Option<&'a Entry<V>> {
    let level = levels[depth].as_str();

    let found = if depth + 1 == levels.len() {
        node.entries
            .get(level)
            .or_else(|| node.entries.get(SINGLE_LEVEL_WILDCARD))
    } else {
        node.children
            .get(level)
            .and_then(|child| most_specific_at(child, levels, depth + 1))
            .or_else(|| {
                node.children
                    .get(SINGLE_LEVEL_WILDCARD)
                    .and_then(|child| most_specific_at(child, levels, depth + 1))
            })
    };

    found.or_else(|| node.entries.get(MULTI_LEVEL_WILDCARD))
}

fn all_matches_at<'a, V>(
    node: &'a Node<V>,
    levels: &[String],
    depth: usize,
    out: &mut Vec<(&'a ResourceName, &'a V)>,
) {
    let push = |entry: Option<&'a Entry<V>>, out: &mut Vec<(&'a ResourceName, &'a V)>| {
        if let Some((pattern, value)) = entry {
            out.push((pattern, value));
        }
    };

    push(node.entries.get(MULTI_LEVEL_WILDCARD), out);

    // A wildcard in the query coincides with the wildcard branch; visit it once.
    let level = levels[depth].as_str();
    if depth + 1 == levels.len() {
        push(node.entries.get(SINGLE_LEVEL_WILDCARD), out);
        if !is_wildcard(level) {
            push(node.entries.get(level), out);
        }
    } else {
        if level != SINGLE_LEVEL_WILDCARD {
            if let Some(child) = node.children.get(level) {
                all_matches_at(child, levels, depth + 1, out);
            }
        }
        if let Some(child) = node.children.get(SINGLE_LEVEL_WILDCARD) {
            all_matches_at(child, levels, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    const PATTERNS: [&str; 12] = [
        "a/b/c", "a/b/+", "a/b/#", "a/+/c", "a/+/+", "a/#", "+/b/c", "+/b/+", "+/+/c", "+/+/+",
        "+/#", "#",
    ];

    fn name(s: &str) -> ResourceName {
        ResourceName::parse(s).unwrap()
    }

    fn populated() -> PatternIndex<&'static str> {
        let mut index = PatternIndex::new();
        for pattern in PATTERNS {
            index.insert(name(pattern), pattern);
        }
        index
    }

    fn matches_of(index: &PatternIndex<&'static str>, query: &str) -> BTreeSet<&'static str> {
        index
            .all_matches(&name(query))
            .into_iter()
            .map(|(_, value)| *value)
            .collect()
    }

    #[test]
    fn test_most_specific() {
        let index = populated();
        let cases = [
            ("a/b/c", "a/b/c"),
            ("a/b/d", "a/b/+"),
            ("a/b/d/e", "a/b/#"),
            ("a/d/c", "a/+/c"),
            ("a/d", "a/#"),
            ("d/e/f", "+/+/+"),
            ("c", "#"),
        ];

        for (query, expected) in cases {
            let (pattern, value) = index.most_specific(&name(query)).unwrap();
            assert_eq!(*value, expected, "query {query}");
            assert_eq!(pattern, &name(expected));
        }
    }

    #[test]
    fn test_most_specific_without_catch_all() {
        let mut index = PatternIndex::new();
        index.insert(name("a/b"), 1);
        assert!(index.most_specific(&name("a/c")).is_none());
        assert!(index.most_specific(&name("a/b/c")).is_none());
        assert_eq!(index.most_specific(&name("a/b")).map(|(_, v)| *v), Some(1));
    }

    #[test]
    fn test_deeper_multi_level_wins() {
        let mut index = PatternIndex::new();
        index.insert(name("#"), "root");
        index.insert(name("a/#"), "a");
        index.insert(name("a/b/#"), "ab");
        assert_eq!(index.most_specific(&name("a/b/c/d")).map(|(_, v)| *v), Some("ab"));
        assert_eq!(index.most_specific(&name("a/x")).map(|(_, v)| *v), Some("a"));
        assert_eq!(index.most_specific(&name("z")).map(|(_, v)| *v), Some("root"));
    }

    #[test]
    fn test_all_matches() {
        let index = populated();

        assert_eq!(matches_of(&index, "a/b/c"), PATTERNS.into_iter().collect());
        assert_eq!(
            matches_of(&index, "a/b/d"),
            ["a/b/+", "a/b/#", "a/+/+", "a/#", "+/b/+", "+/+/+", "+/#", "#"]
                .into_iter()
                .collect()
        );
        assert_eq!(matches_of(&index, "c"), ["#"].into_iter().collect());
    }

    #[test]
    fn test_all_matches_has_no_duplicates() {
        let index = populated();
        for query in ["a/b/c", "a/+/c", "+/+/+", "a/b/#"] {
            let matches = index.all_matches(&name(query));
            let unique: BTreeSet<_> = matches.iter().map(|(p, _)| p.to_string()).collect();
            assert_eq!(matches.len(), unique.len(), "query {query}");
        }
    }

    #[test]
    fn test_insert_overwrites() {
        let mut index = PatternIndex::new();
        assert_eq!(index.insert(name("a/+"), 1), None);
        assert_eq!(index.insert(name("/a/+"), 2), Some(1));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&name("a/+")), Some(&2));
    }

    #[test]
    fn test_remove_prunes() {
        let mut index = populated();
        assert_eq!(index.remove(&name("a/b/c")), Some("a/b/c"));
        assert_eq!(index.remove(&name("a/b/c")), None);
        assert_eq!(index.remove(&name("x/y")), None);
        assert_eq!(index.len(), 11);

        for pattern in PATTERNS {
            index.remove(&name(pattern));
        }
        assert!(index.is_empty());
        assert!(index.root.is_empty());
    }

    #[test]
    fn test_entries_and_get_mut() {
        let mut index = populated();
        *index.get_mut(&name("+/#")).unwrap() = "changed";

        let entries: BTreeSet<_> = index.entries().into_iter().map(|(_, v)| *v).collect();
        assert_eq!(entries.len(), 12);
        assert!(entries.contains("changed"));
        assert!(!entries.contains("+/#"));
    }

    #[test]
    fn test_retain() {
        let mut index = populated();
        index.retain(|pattern, _| !pattern.as_str().starts_with('a'));
        assert_eq!(index.len(), 6);
        assert!(index.get(&name("a/b/c")).is_none());
        assert!(index.root.children.get("a").is_none());
        assert_eq!(index.most_specific(&name("a/b/c")).map(|(_, v)| *v), Some("+/b/c"));
    }

    proptest! {
        #[test]
        fn all_matches_agrees_with_name_matching(
            query in proptest::collection::vec("[a-c]", 1..5)
        ) {
            let index = populated();
            let query = ResourceName::from_levels(query).unwrap();

            let found: BTreeSet<String> = index
                .all_matches(&query)
                .into_iter()
                .map(|(pattern, _)| pattern.to_string())
                .collect();
            let expected: BTreeSet<String> = PATTERNS
                .into_iter()
                .filter(|pattern| name(pattern).matches(&query))
                .map(str::to_owned)
                .collect();

            prop_assert_eq!(found, expected);
        }
    }
}
