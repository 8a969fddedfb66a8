//! Hierarchical resource names and wildcard patterns.
//!
//! A resource name is a non-empty sequence of `/`-separated levels such as
//! `sensors/kitchen/temperature`. Two level tokens are reserved:
//!
//! - `+` matches exactly one level;
//! - `#` matches one or more trailing levels and may only appear last.
//!
//! A name without wildcards is *simple* and addresses a single resource; a
//! name with at least one wildcard is a *pattern*.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::{Error, Result};

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Level separator.
pub const SEPARATOR: char = '/';

/// Token matching exactly one level.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Token matching one or more trailing levels.
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// An immutable, validated resource name or pattern.
///
/// Equality, hashing and ordering all follow the canonical string form, so
/// `/a/b` and `a/b` are the same name.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName {
    canonical: String,
    levels: Vec<String>,
}

impl ResourceName {
    /// Parses a name, stripping one leading separator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if a level is empty, mixes a wildcard
    /// with other characters, or if `#` is not the last level.
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.strip_prefix(SEPARATOR).unwrap_or(name);
        let levels = trimmed.split(SEPARATOR).map(str::to_owned).collect();

        Self::build(levels).map_err(|reason| Error::InvalidName {
            name: name.to_owned(),
            reason,
        })
    }

    /// Builds a name from already split levels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] under the same rules as [`Self::parse`].
    pub fn from_levels<I, S>(levels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let levels: Vec<String> = levels.into_iter().map(Into::into).collect();
        let joined = levels.join("/");

        Self::build(levels).map_err(|reason| Error::InvalidName {
            name: joined,
            reason,
        })
    }

    fn build(levels: Vec<String>) -> std::result::Result<Self, &'static str> {
        if levels.is_empty() {
            return Err("a name needs at least one level");
        }

        let last = levels.len() - 1;
        for (index, level) in levels.iter().enumerate() {
            validate_level(level)?;
            if level == MULTI_LEVEL_WILDCARD && index != last {
                return Err("`#` may only be the last level");
            }
        }

        Ok(Self {
            canonical: levels.join("/"),
            levels,
        })
    }

    /// The levels of this name.
    #[must_use]
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Number of levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Always `false`; names have at least one level.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// The level at `index`, if any.
    #[must_use]
    pub fn level(&self, index: usize) -> Option<&str> {
        self.levels.get(index).map(String::as_str)
    }

    /// The final level.
    #[must_use]
    pub fn last_level(&self) -> &str {
        self.levels.last().map_or("", String::as_str)
    }

    /// The canonical `/`-joined form without a leading separator.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// True if no level is a wildcard.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        !self.is_pattern()
    }

    /// True if at least one level is a wildcard.
    #[must_use]
    pub fn is_pattern(&self) -> bool {
        self.levels.iter().any(|level| is_wildcard(level))
    }

    /// Appends the levels of `suffix` to this name. An empty suffix yields
    /// a copy of this name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] if `suffix` is malformed or if the
    /// result would place `#` anywhere but last.
    pub fn resolve(&self, suffix: &str) -> Result<Self> {
        if suffix.is_empty() {
            return Ok(self.clone());
        }

        let suffix = Self::parse(suffix)?;
        let levels = self.levels.iter().chain(suffix.levels.iter()).cloned();

        Self::from_levels(levels)
    }

    /// The levels in `begin..end` as a new name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `end` exceeds the length, if
    /// `begin > end`, or if the range is empty.
    pub fn subresource(&self, begin: usize, end: usize) -> Result<Self> {
        if end > self.len() || begin >= end {
            return Err(Error::InvalidRange {
                begin,
                end,
                len: self.len(),
            });
        }

        Self::from_levels(self.levels[begin..end].iter().cloned())
    }

    /// Replaces the level at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIndex`] if `index` is out of bounds and
    /// [`Error::InvalidName`] if the replacement breaks the grammar.
    pub fn replace_level(&self, index: usize, level: &str) -> Result<Self> {
        if index >= self.len() {
            return Err(Error::InvalidIndex {
                index,
                len: self.len(),
            });
        }

        let mut levels = self.levels.clone();
        level.clone_into(&mut levels[index]);

        Self::from_levels(levels)
    }

    /// Whether this name, read as a pattern, covers `concrete`.
    ///
    /// A simple name only matches itself.
    #[must_use]
    pub fn matches(&self, concrete: &Self) -> bool {
        for (index, level) in self.levels.iter().enumerate() {
            if level == MULTI_LEVEL_WILDCARD {
                return index < concrete.len();
            }

            match concrete.levels.get(index) {
                Some(other) if level == SINGLE_LEVEL_WILDCARD || level == other => {}
                _ => return false,
            }
        }

        self.len() == concrete.len()
    }
}

/// True for the two reserved wildcard tokens.
#[must_use]
pub fn is_wildcard(level: &str) -> bool {
    level == SINGLE_LEVEL_WILDCARD || level == MULTI_LEVEL_WILDCARD
}

fn validate_level(level: &str) -> std::result::Result<(), &'static str> {
    if level.is_empty() {
        return Err("levels must not be empty");
    }

    if level.len() > 1 && (level.contains('+') || level.contains('#')) {
        return Err("wildcards must occupy a whole level");
    }

    Ok(())
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceName({:?})", self.canonical)
    }
}

impl PartialEq for ResourceName {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ResourceName {}

impl Hash for ResourceName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for ResourceName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl AsRef<str> for ResourceName {
    fn as_ref(&self) -> &str {
        &self.canonical
    }
}

impl FromStr for ResourceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ResourceName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for ResourceName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.canonical
    }
}
