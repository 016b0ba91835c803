//! Media identifiers.
//!
//! A [`MediaId`] is the stable handle a caller receives when pinning a source.
//! Ids are assigned monotonically starting at 1; `0` is reserved as the
//! "not found" sentinel so that lookups on malformed input never have to fail
//! loudly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::paths::MEDIA_STORE_SCHEME;

/// Identifier of a pinned media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(u32);

impl MediaId {
    /// The "not found" sentinel.
    pub const NONE: MediaId = MediaId(0);

    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Return the raw numeric value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this is the "not found" sentinel.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The id following this one, or `None` once the id space is used up.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// Decompose a `mediastore://<id>` path.
    ///
    /// Anything that is not the scheme followed by a decimal `u32` yields
    /// [`MediaId::NONE`].
    #[must_use]
    pub fn from_store_path(path: &str) -> Self {
        path.strip_prefix(MEDIA_STORE_SCHEME)
            .and_then(|rest| rest.trim_end_matches('/').parse::<u32>().ok())
            .map(Self)
            .unwrap_or(Self::NONE)
    }

    /// Build the `mediastore://<id>` path for this id.
    #[must_use]
    pub fn store_path(self) -> String {
        format!("{MEDIA_STORE_SCHEME}{}", self.0)
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MediaId {
    type Err = std::num::ParseIntError;

    /// Accepts either a bare number or a `mediastore://` path.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.strip_prefix(MEDIA_STORE_SCHEME)
            .unwrap_or(s)
            .parse::<u32>()
            .map(Self)
    }
}

impl From<u32> for MediaId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<MediaId> for u32 {
    fn from(id: MediaId) -> Self {
        id.0
    }
}
