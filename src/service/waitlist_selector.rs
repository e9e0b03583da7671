use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{domain::WaitlistEntry, repository::capacity};

fn selection_key(entry: &WaitlistEntry) -> (i64, DateTime<Utc>, Uuid) {
    (entry.priority, entry.joined_at, entry.id)
}

/// Picks the first `n` candidates by (priority, joined_at, id).
///
/// Pure and deterministic: the same pool yields the same selection no
/// matter how it is ordered on the way in. Eligibility filtering happens
/// before this; every entry in `pool` is assumed invitable.
pub fn select_candidates(pool: &[WaitlistEntry], n: usize) -> Vec<WaitlistEntry> {
    let mut ordered: Vec<&WaitlistEntry> = pool.iter().collect();
    ordered.sort_by_key(|entry| selection_key(entry));

    ordered.into_iter()
        .take(n)
        .cloned()
        .collect()
}

/// Size of the next invitation batch: never more than the seats left.
pub fn batch_size_for(batch_size: i64, capacity: i64, occupied: i64) -> usize {
    batch_size.min(capacity::remaining(capacity, occupied)).max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Attendee;
    use chrono::Duration;

    fn entry(priority: i64, joined_offset_mins: i64) -> WaitlistEntry {
        WaitlistEntry {
            id: Uuid::new_v4(),
            attendee: Attendee::Member(Uuid::new_v4()),
            full_name: "Test Person".to_string(),
            email: "test@example.com".to_string(),
            priority,
            joined_at: Utc::now() + Duration::minutes(joined_offset_mins),
            fulfilled_at: None,
            removed_at: None,
        }
    }

    #[test]
    fn test_priority_beats_join_time() {
        let early_low = entry(5, 0);
        let late_high = entry(-1, 60);
        let selected = select_candidates(&[early_low.clone(), late_high.clone()], 1);
        assert_eq!(selected, vec![late_high]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let first = entry(0, 0);
        let second = entry(0, 10);
        let third = entry(0, 20);
        let selected = select_candidates(&[third, second.clone(), first.clone()], 2);
        assert_eq!(selected, vec![first, second]);
    }

    #[test]
    fn test_empty_pool_and_zero_slots() {
        assert!(select_candidates(&[], 3).is_empty());
        assert!(select_candidates(&[entry(0, 0)], 0).is_empty());
    }

    #[test]
    fn test_batch_size_for() {
        assert_eq!(batch_size_for(4, 10, 0), 4);
        assert_eq!(batch_size_for(4, 10, 8), 2);
        assert_eq!(batch_size_for(4, 10, 10), 0);
        assert_eq!(batch_size_for(4, 10, 12), 0);
    }
}
