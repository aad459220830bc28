//! Active recovery-test pacing and records.

use herd_core::{EpochMillis, ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Progressive delays between active tests of a half-open pair. The
/// schedule switches when the last failure kind was non-retryable; past the
/// end of either schedule, testing stops until the pair's breaker state
/// changes.
const TRANSIENT_SCHEDULE_SECS: [u64; 7] = [30, 60, 120, 240, 480, 900, 1_800];
const NON_RETRYABLE_SCHEDULE_SECS: [u64; 5] = [300, 600, 1_200, 2_400, 3_600];

/// Delay before test number `test_count` (zero-based: the first test has no
/// gate). `None` means the schedule is exhausted.
pub fn next_test_delay(test_count: u32, non_retryable: bool) -> Option<Duration> {
    if test_count == 0 {
        return Some(Duration::ZERO);
    }
    let schedule: &[u64] = if non_retryable {
        &NON_RETRYABLE_SCHEDULE_SECS
    } else {
        &TRANSIENT_SCHEDULE_SECS
    };
    schedule
        .get(test_count as usize - 1)
        .map(|secs| Duration::from_secs(*secs))
}

/// One failure observed by the scheduler, persisted for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryFailureRecord {
    pub timestamp: EpochMillis,
    pub server_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub error_kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    pub consecutive_failures: u32,
    /// `main-probe`, `recovery-probe`, or `active-test`.
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_state: Option<String>,
}

/// Read view of one pair's active-test pacing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryTestSnapshot {
    pub server_id: String,
    pub model: String,
    pub test_count: u32,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub non_retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_test_at: Option<EpochMillis>,
}
