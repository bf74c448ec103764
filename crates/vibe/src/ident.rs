//! Unique element identifiers
//!
//! Ids are a prefix plus a UUID. The random bytes come from the OS secure
//! source; if that source is unavailable the id falls back to a v7 UUID built
//! from the clock and a process-wide counter, which is unique but guessable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::{Builder, Uuid};

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate `prefix` followed by a fresh UUID
pub fn unique_id(prefix: &str) -> String {
    format!("{prefix}{}", uuid())
}

fn uuid() -> Uuid {
    let mut bytes = [0u8; 16];
    match getrandom::fill(&mut bytes) {
        Ok(()) => Builder::from_random_bytes(bytes).into_uuid(),
        Err(err) => {
            tracing::debug!("secure random source unavailable ({err}), using clock-based id");
            fallback_uuid()
        }
    }
}

fn fallback_uuid() -> Uuid {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let count = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut tail = [0u8; 10];
    tail[..8].copy_from_slice(&count.to_be_bytes());
    tail[8..].copy_from_slice(&(now.subsec_nanos() as u16).to_be_bytes());

    Builder::from_unix_timestamp_millis(now.as_millis() as u64, &tail).into_uuid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_prefixed_v4() {
        let id = unique_id("vibe-");
        let raw = id.strip_prefix("vibe-").unwrap();
        let parsed = Uuid::parse_str(raw).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn test_fallback_is_unique_v7() {
        let ids: HashSet<_> = (0..1000).map(|_| fallback_uuid()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.get_version_num() == 7));
    }
}
