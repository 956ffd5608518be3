//! Snapshot file naming: `<YYYYMMDDhhmm>-<hostname>-<NN>.gz.enc`.

use time::OffsetDateTime;
use time::macros::format_description;

use crate::SNAPSHOT_SUFFIX;
use crate::error::SnapshotError;

/// Parsed components of a snapshot file name.
///
/// The hostname may itself contain dashes, so parsing takes the stamp from
/// the front and the increment from the back and leaves the rest as the
/// hostname.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotName {
    /// `YYYYMMDDhhmm` rendering of the generation's base timestamp (UTC).
    pub stamp: String,
    /// Hostname embedded in the name.
    pub hostname: String,
    /// Increment within the generation.
    pub increment: u16,
}

impl SnapshotName {
    /// Renders the file name for a generation member.
    pub fn format(
        base_timestamp: i64,
        hostname: &str,
        increment: u16,
    ) -> Result<String, SnapshotError> {
        let stamp = stamp_for(base_timestamp)?;
        Ok(format!("{stamp}-{hostname}-{increment}{SNAPSHOT_SUFFIX}"))
    }

    /// Parses a file name produced by [`Self::format`].
    ///
    /// Returns `None` for anything else, which lets directory scans skip
    /// foreign files without error handling at every call site.
    #[must_use]
    pub fn parse(file_name: &str) -> Option<Self> {
        let rest = file_name.strip_suffix(SNAPSHOT_SUFFIX)?;
        let (stamp, rest) = rest.split_once('-')?;
        let (hostname, increment) = rest.rsplit_once('-')?;
        if stamp.len() != 12 || !stamp.bytes().all(|b| b.is_ascii_digit()) || hostname.is_empty() {
            return None;
        }
        let increment: u16 = increment.parse().ok()?;
        Some(Self {
            stamp: stamp.to_string(),
            hostname: hostname.to_string(),
            increment,
        })
    }
}

/// Renders a unix timestamp as the UTC `YYYYMMDDhhmm` stamp.
pub(crate) fn stamp_for(timestamp: i64) -> Result<String, SnapshotError> {
    let moment = OffsetDateTime::from_unix_timestamp(timestamp)
        .map_err(|_| SnapshotError::TimestampOutOfRange { timestamp })?;
    moment
        .format(format_description!("[year][month][day][hour][minute]"))
        .map_err(|_| SnapshotError::TimestampOutOfRange { timestamp })
}
