//! Smoothed speed and ETA for downloads whose progress is only observed by
//! polling (records of the platform download store).

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use super::constants::UNKNOWN_ETA;
use super::identity::DownloadId;
use super::record::DownloadStatus;

#[derive(Debug, Clone, Copy)]
struct RateSample {
    bytes: u64,
    at: Instant,
    speed: u64,
}

/// Per-download exponential moving average of polled byte counts.
///
/// Each new instantaneous speed weighs 30% against 70% for the previous
/// smoothed value. Samples only exist while a download is running.
#[derive(Debug, Default)]
pub struct RateEstimator {
    samples: HashMap<DownloadId, RateSample>,
}

impl RateEstimator {
    /// Creates an estimator with no samples.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one observation and returns `(speed, eta)`.
    ///
    /// `speed` is in bytes per second; `eta` in whole seconds or
    /// [`UNKNOWN_ETA`]. A download that is not running is reset to `(0, -1)`.
    pub fn estimate(
        &mut self,
        id: DownloadId,
        downloaded_bytes: u64,
        total_size: i64,
        status: DownloadStatus,
        now: Instant,
    ) -> (u64, i64) {
        if status != DownloadStatus::Running {
            self.samples.remove(&id);
            return (0, UNKNOWN_ETA);
        }

        let previous = self.samples.get(&id).copied();
        let previous_speed = previous.map_or(0, |sample| sample.speed);
        let smoothed = match previous {
            None => previous_speed,
            Some(sample) => {
                let elapsed_ms = now.saturating_duration_since(sample.at).as_millis();
                if elapsed_ms == 0 {
                    sample.speed
                } else {
                    let delta = downloaded_bytes.saturating_sub(sample.bytes);
                    let instant = u64::try_from(u128::from(delta) * 1000 / elapsed_ms)
                        .unwrap_or(u64::MAX);
                    smooth(sample.speed, instant)
                }
            }
        };

        let (speed, eta) = match u64::try_from(total_size) {
            Ok(total) if smoothed > 0 && total > 0 => {
                let remaining = total.saturating_sub(downloaded_bytes);
                (
                    smoothed,
                    i64::try_from(remaining / smoothed).unwrap_or(i64::MAX),
                )
            }
            _ if smoothed == 0 => (previous_speed, UNKNOWN_ETA),
            _ => (smoothed, UNKNOWN_ETA),
        };

        self.samples.insert(
            id,
            RateSample {
                bytes: downloaded_bytes,
                at: now,
                speed,
            },
        );
        (speed, eta)
    }

    /// Drops samples for downloads no longer present.
    pub fn retain(&mut self, live: &HashSet<DownloadId>) {
        self.samples.retain(|id, _| live.contains(id));
    }

    /// Number of downloads currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no download is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn smooth(previous: u64, instant: u64) -> u64 {
    if previous == 0 {
        return instant;
    }
    let weighted = u128::from(previous) * 7 + u128::from(instant) * 3;
    u64::try_from(weighted / 10).unwrap_or(u64::MAX)
}
