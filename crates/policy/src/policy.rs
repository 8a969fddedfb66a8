use crate::Credentials;
use crate::error::{Error, Result};
use crate::rights::Rights;

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rxp_name::ResourceName;
use rxp_pattern_index::PatternIndex;
use tracing::debug;

/// Rights granted on one pattern, optionally until a deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessEntry {
    /// The granted permissions.
    pub rights: Rights,
    /// Expiration in epoch milliseconds; `0` never expires.
    pub expiration: u64,
}

impl AccessEntry {
    /// True once `now` has passed a non-zero expiration.
    #[must_use]
    pub const fn is_expired(&self, now: u64) -> bool {
        self.expiration != 0 && now > self.expiration
    }
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

/// Pattern-based grants resolved by most-specific match.
///
/// Expired grants are evicted lazily by the lookup that finds them.
#[derive(Default)]
pub struct AccessPolicy {
    index: Mutex<PatternIndex<AccessEntry>>,
}

impl AccessPolicy {
    /// Creates a policy granting nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a policy from an authorization string that never expires.
    ///
    /// # Errors
    ///
    /// Fails like [`Self::parse_authorization`].
    pub fn from_authorization(text: &str) -> Result<Self> {
        let policy = Self::new();
        policy.parse_authorization(text, 0)?;
        Ok(policy)
    }

    /// Grants `rights` (e.g. `"cr"` or `"-"`) on `pattern` without expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if either argument fails to parse.
    pub fn grant(&self, pattern: &str, rights: &str) -> Result<()> {
        self.grant_until(pattern, rights, 0)
    }

    /// Grants `rights` on `pattern` until `expiration` (epoch millis).
    ///
    /// # Errors
    ///
    /// Returns an error if either argument fails to parse.
    pub fn grant_until(&self, pattern: &str, rights: &str, expiration: u64) -> Result<()> {
        let pattern = ResourceName::parse(pattern)?;
        let rights = Rights::parse(rights)?;
        self.insert(pattern, AccessEntry { rights, expiration });
        Ok(())
    }

    /// Installs an already parsed entry, replacing any grant on `pattern`.
    pub fn insert(&self, pattern: ResourceName, entry: AccessEntry) {
        self.index.lock().insert(pattern, entry);
    }

    /// Installs every `pattern rights` pair of a comma-separated list with a
    /// shared expiration.
    ///
    /// Each pair splits on its last space or tab, so patterns may contain
    /// spaces. Blank pairs are skipped. Nothing is installed if any pair is
    /// malformed, or if `expiration` is non-zero and already past.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAuthorization`] for a pair without a
    /// separator, and the parse error of a bad pattern or rights string.
    pub fn parse_authorization(&self, text: &str, expiration: u64) -> Result<()> {
        let pairs = parse_pairs(text)?;

        if expiration != 0 && now_millis() >= expiration {
            debug!(expiration, "ignoring authorization that has already expired");
            return Ok(());
        }

        let mut index = self.index.lock();
        for (pattern, rights) in pairs {
            index.insert(pattern, AccessEntry { rights, expiration });
        }
        Ok(())
    }

    /// Rights granted by the most specific live entry covering `name`.
    #[must_use]
    pub fn rights(&self, name: &ResourceName) -> Rights {
        let now = now_millis();
        let mut index = self.index.lock();

        loop {
            let Some((pattern, entry)) = index.most_specific(name) else {
                return Rights::NONE;
            };
            if !entry.is_expired(now) {
                return entry.rights;
            }

            let expired = pattern.clone();
            debug!(pattern = %expired, "evicting expired grant");
            index.remove(&expired);
        }
    }

    /// Every stored grant, including expired ones not yet evicted.
    #[must_use]
    pub fn entries(&self) -> Vec<(ResourceName, AccessEntry)> {
        self.index
            .lock()
            .entries()
            .into_iter()
            .map(|(pattern, entry)| (pattern.clone(), *entry))
            .collect()
    }

    /// Number of stored grants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    /// True if nothing has been granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }
}

fn parse_pairs(text: &str) -> Result<Vec<(ResourceName, Rights)>> {
    text.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let split = pair
                .rfind([' ', '\t'])
                .ok_or_else(|| Error::InvalidAuthorization(pair.to_owned()))?;
            let pattern = ResourceName::parse(pair[..split].trim_end())?;
            let rights = Rights::parse(&pair[split + 1..])?;
            Ok((pattern, rights))
        })
        .collect()
}

impl Credentials for AccessPolicy {
    fn can_create(&self, resource: &ResourceName) -> bool {
        self.rights(resource).contains(Rights::CREATE)
    }

    fn can_read(&self, resource: &ResourceName) -> bool {
        self.rights(resource).contains(Rights::READ)
    }

    fn can_update(&self, resource: &ResourceName) -> bool {
        self.rights(resource).contains(Rights::UPDATE)
    }

    fn can_delete(&self, resource: &ResourceName) -> bool {
        self.rights(resource).contains(Rights::DELETE)
    }

    fn serialize(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, (pattern, entry)) in self.entries().into_iter().enumerate() {
            if position > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{pattern} {}", entry.rights)?;
        }
        Ok(())
    }
}

impl fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccessPolicy").field(&self.to_string()).finish()
    }
}
