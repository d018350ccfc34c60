use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

// Monotonic milliseconds since the first call in this process
pub fn get_timestamp() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

// True once `period_ms` has passed since `since`
pub fn has_elapsed(since: u64, period_ms: u64, now: u64) -> bool {
    now.saturating_sub(since) >= period_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_monotonic() {
        let first = get_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(get_timestamp() >= first + 1);
    }

    #[test]
    fn test_has_elapsed() {
        assert!(!has_elapsed(1_000, 500, 1_499));
        assert!(has_elapsed(1_000, 500, 1_500));
        assert!(!has_elapsed(2_000, 500, 1_000));
    }
}
