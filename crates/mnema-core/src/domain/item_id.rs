use super::errors::CoreError;
use std::sync::atomic::{AtomicU64, Ordering};

/// Highest issuable item ID. IDs are zero-padded decimals in
/// [1, 999_999], issued monotonically.
pub const MAX_ITEM_ID: u64 = 999_999;

/// Process-wide monotonic item-ID counter. Owned by the item store (not a
/// free-floating static) so it can be seeded from persisted items and
/// snapshotted across restarts.
#[derive(Debug, Default)]
pub struct IdCounter {
    last_issued: AtomicU64,
}

impl IdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a persisted maximum. Keeps the higher of the two so a
    /// stale snapshot can never cause re-issuing.
    pub fn seed(&self, max_seen: u64) {
        self.last_issued.fetch_max(max_seen, Ordering::SeqCst);
    }

    /// Issue the next ID, formatted as a zero-padded six-digit decimal.
    pub fn issue(&self) -> Result<String, CoreError> {
        let next = self.last_issued.fetch_add(1, Ordering::SeqCst) + 1;
        if next > MAX_ITEM_ID {
            // Roll back so repeated calls keep failing instead of wrapping.
            self.last_issued.store(MAX_ITEM_ID, Ordering::SeqCst);
            return Err(CoreError::DuplicateItemId(
                "item id counter exhausted".to_string(),
            ));
        }
        Ok(format_item_id(next))
    }

    /// Current maximum, for persisting across restarts.
    pub fn snapshot(&self) -> u64 {
        self.last_issued.load(Ordering::SeqCst)
    }
}

pub fn format_item_id(n: u64) -> String {
    format!("{:06}", n)
}

/// Parse an ID issued by this counter. Foreign IDs (any other collision-free
/// scheme) return None and simply do not participate in counter seeding.
pub fn parse_item_id(id: &str) -> Option<u64> {
    if id.len() != 6 || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = id.parse().ok()?;
    (1..=MAX_ITEM_ID).contains(&n).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issues_zero_padded_monotonic_ids() {
        let counter = IdCounter::new();
        assert_eq!(counter.issue().unwrap(), "000001");
        assert_eq!(counter.issue().unwrap(), "000002");
        assert_eq!(counter.snapshot(), 2);
    }

    #[test]
    fn seed_resumes_from_persisted_maximum() {
        let counter = IdCounter::new();
        counter.seed(41);
        assert_eq!(counter.issue().unwrap(), "000042");

        // Seeding backwards is a no-op.
        counter.seed(10);
        assert_eq!(counter.issue().unwrap(), "000043");
    }

    #[test]
    fn exhaustion_is_an_error_and_stays_one() {
        let counter = IdCounter::new();
        counter.seed(MAX_ITEM_ID);
        assert!(counter.issue().is_err());
        assert!(counter.issue().is_err());
    }

    #[test]
    fn parses_only_canonical_ids() {
        assert_eq!(parse_item_id("000042"), Some(42));
        assert_eq!(parse_item_id("999999"), Some(999_999));
        assert_eq!(parse_item_id("000000"), None);
        assert_eq!(parse_item_id("42"), None);
        assert_eq!(parse_item_id("00004x"), None);
        assert_eq!(parse_item_id("custom-id"), None);
    }
}
