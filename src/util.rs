//! Small shared helpers.

/// Current wall-clock time as milliseconds since the Unix epoch.
pub(crate) fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_millis_is_recent() {
        // 2020-01-01 in millis; anything earlier means a broken clock source.
        assert!(unix_millis() > 1_577_836_800_000);
    }
}
