pub mod error;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the unix epoch.
pub fn millis_since_unix_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time is valid")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_since_unix_epoch() {
        let a = millis_since_unix_epoch();
        let b = millis_since_unix_epoch();
        assert!(b >= a);
        // Sanity: we are past 2020.
        assert!(a > 1_600_000_000_000);
    }
}
