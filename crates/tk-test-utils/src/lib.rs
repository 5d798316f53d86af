// tk-test-utils: Shared test utilities for the SDK integration suites.
//
// Provides a scriptable mock of the flag service (polling, streaming, and
// events endpoints on one ephemeral port) so suites can exercise the
// client end-to-end without a real backend.

pub mod mock_service;

pub use mock_service::{MockFlagService, MockFlagServiceBuilder, RecordedEventPost, RecordedPoll};

use std::time::Duration;

/// Wait for `condition` to hold, re-checking on a short cadence.  Panics
/// after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}
