//! Blob modification timestamps.
//!
//! Seconds since the Unix epoch, matching the 8-byte field stored in every
//! head chunk's metadata.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Modification time of a blob, in seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Mtime(pub u64);

impl Mtime {
    /// Creates a timestamp from seconds since the Unix epoch.
    pub const fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_secs())
    }

    /// Returns the seconds since the Unix epoch.
    pub const fn as_secs(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Mtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

impl From<u64> for Mtime {
    fn from(secs: u64) -> Self {
        Self(secs)
    }
}

impl From<Mtime> for u64 {
    fn from(mtime: Mtime) -> Self {
        mtime.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mtime_now_is_recent() {
        let ts = Mtime::now();
        // After 2024-01-01.
        assert!(ts.as_secs() > 1_704_067_200);
    }

    #[test]
    fn test_mtime_conversions() {
        let ts = Mtime::from(1_700_000_000u64);
        assert_eq!(u64::from(ts), 1_700_000_000);
    }
}
