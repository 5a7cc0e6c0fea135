//! URL-derived download identities.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Key of a download in the registry and in the unified view.
///
/// Custom downloads derive it from their source URL, so re-issuing a start for
/// the same URL finds the existing transfer. External records use the id the
/// platform store assigned; both share this space so the unified view can be
/// ordered by a single key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DownloadId(u64);

impl DownloadId {
    /// Wraps a raw id (external store ids, tests).
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Derives the identity of a custom download from its source URL.
    ///
    /// The first eight bytes of the SHA-256 digest of the URL, big endian.
    /// Unlike `std`'s hasher this is stable across processes and builds.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(prefix))
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
