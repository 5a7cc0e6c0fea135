#![allow(dead_code)]

pub mod raw_http;
// Shared with the library's unit tests.
#[path = "../../src/test_support/socket_guard.rs"]
pub mod socket_guard;

use std::time::Duration;

/// Polls `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn poll_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Deterministic body of `len` bytes.
#[must_use]
pub fn patterned_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).unwrap_or(0)).collect()
}
