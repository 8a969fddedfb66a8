use crate::error::{Error, Result};

use std::fmt;

/// A set of create/read/update/delete permissions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rights(u8);

impl Rights {
    /// No permissions.
    pub const NONE: Self = Self(0);
    /// Permission to create resources.
    pub const CREATE: Self = Self(0b0001);
    /// Permission to read and subscribe.
    pub const READ: Self = Self(0b0010);
    /// Permission to update resources.
    pub const UPDATE: Self = Self(0b0100);
    /// Permission to delete resources.
    pub const DELETE: Self = Self(0b1000);
    /// Every permission.
    pub const ALL: Self = Self(0b1111);

    /// Parses `-` or any mix of `c`, `r`, `u`, `d` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAccessSpec`] on any other character.
    pub fn parse(spec: &str) -> Result<Self> {
        if spec == "-" {
            return Ok(Self::NONE);
        }

        spec.chars().try_fold(Self::NONE, |rights, c| {
            let right = match c.to_ascii_lowercase() {
                'c' => Self::CREATE,
                'r' => Self::READ,
                'u' => Self::UPDATE,
                'd' => Self::DELETE,
                _ => return Err(Error::InvalidAccessSpec(spec.to_owned())),
            };
            Ok(rights | right)
        })
    }

    /// True if every permission in `other` is present.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no permission is present.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Rights {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }

        for (right, letter) in [
            (Self::CREATE, 'c'),
            (Self::READ, 'r'),
            (Self::UPDATE, 'u'),
            (Self::DELETE, 'd'),
        ] {
            if self.contains(right) {
                write!(f, "{letter}")?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Rights {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
