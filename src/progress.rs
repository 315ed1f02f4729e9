//! Progress and remaining-time estimation from byte counters.
//!
//! All functions are pure. An unknown or zero expected size, zero elapsed time,
//! or zero observed speed yields `None` ("indeterminate") instead of a
//! division by zero.

use std::time::Duration;

/// Fraction of the transfer completed, clamped to `[0, 1]`.
///
/// Returns `None` when the expected size is unknown or zero.
///
/// # Example
///
/// ```
/// use download_manager::progress::fraction_complete;
///
/// assert_eq!(fraction_complete(500, Some(1000)), Some(0.5));
/// assert_eq!(fraction_complete(500, None), None);
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fraction_complete(bytes_written: u64, bytes_expected: Option<u64>) -> Option<f64> {
    let expected = bytes_expected.filter(|expected| *expected > 0)?;
    Some((bytes_written as f64 / expected as f64).clamp(0.0, 1.0))
}

/// Observed transfer speed in bytes per second.
///
/// Returns `None` when no time has elapsed or nothing has been written yet.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn transfer_speed(bytes_written: u64, elapsed: Duration) -> Option<f64> {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 || bytes_written == 0 {
        return None;
    }
    Some(bytes_written as f64 / seconds)
}

/// Estimated seconds until the transfer completes at the average speed so far.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use download_manager::progress::estimated_seconds_remaining;
///
/// // 250 bytes in 1s leaves 750 bytes, i.e. 3 more seconds.
/// let eta = estimated_seconds_remaining(250, Some(1000), Duration::from_secs(1));
/// assert_eq!(eta, Some(3.0));
/// assert_eq!(estimated_seconds_remaining(250, Some(1000), Duration::ZERO), None);
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn estimated_seconds_remaining(
    bytes_written: u64,
    bytes_expected: Option<u64>,
    elapsed: Duration,
) -> Option<f64> {
    let expected = bytes_expected.filter(|expected| *expected > 0)?;
    let speed = transfer_speed(bytes_written, elapsed)?;
    let remaining = expected.saturating_sub(bytes_written);
    Some(remaining as f64 / speed)
}
