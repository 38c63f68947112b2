//! Ordered view of upcoming alarm occurrences, used for status display.
//!
//! Entries stay sorted by firing instant (ties break on ascending rule
//! index) and expired entries are pruned lazily as a prefix trim.

use chrono::{DateTime, Local};

/// One computed next-occurrence of a rule. Ephemeral: recomputed on every
/// configuration change or firing, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub rule_index: usize,
    pub fires_at: DateTime<Local>,
    /// Display form of the action, e.g. "Faded Play".
    pub label: String,
}

/// Insertion-sorted sequence of pending occurrences.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Vec<Occurrence>,
}

/// Rendered when no rule is armed.
pub const EMPTY_STATE: &str = "No active alarms";

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The earliest pending occurrence, if any.
    pub fn next(&self) -> Option<&Occurrence> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Occurrence> {
        self.entries.iter()
    }

    /// Insert keeping ascending (instant, rule index) order.
    pub fn insert(&mut self, occurrence: Occurrence) {
        let key = (occurrence.fires_at, occurrence.rule_index);
        let position = self
            .entries
            .partition_point(|e| (e.fires_at, e.rule_index) <= key);
        self.entries.insert(position, occurrence);
    }

    /// Drop entries whose instant has passed. The entries are sorted, so
    /// this is a prefix trim up to the first still-valid entry.
    pub fn prune_expired(&mut self, now: DateTime<Local>) {
        let expired = self.entries.iter().take_while(|e| e.fires_at <= now).count();
        self.entries.drain(..expired);
    }

    /// Render at most `max` upcoming entries, one per line. When more
    /// entries exist the last line carries a `(+N more)` marker; an empty
    /// queue renders [`EMPTY_STATE`].
    pub fn describe(&self, max: usize) -> String {
        if self.entries.is_empty() {
            return EMPTY_STATE.to_string();
        }

        let shown = max.min(self.entries.len());
        if shown == 0 {
            return format!("({} alarms pending)", self.entries.len());
        }

        let mut lines: Vec<String> = self.entries[..shown]
            .iter()
            .map(|e| format!("{} @ {}", e.label, e.fires_at.format("%a %b %e %H:%M")))
            .collect();

        let hidden = self.entries.len() - shown;
        if hidden > 0 {
            let last = lines.last_mut().expect("shown is at least one");
            last.push_str(&format!(" (+{hidden} more)"));
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn occurrence(rule_index: usize, offset_minutes: i64) -> Occurrence {
        let base = Local.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap();
        Occurrence {
            rule_index,
            fires_at: base + Duration::minutes(offset_minutes),
            label: "Play".into(),
        }
    }

    #[test]
    fn keeps_ascending_order() {
        let mut queue = PendingQueue::new();
        queue.insert(occurrence(0, 30));
        queue.insert(occurrence(1, 10));
        queue.insert(occurrence(2, 20));
        let order: Vec<usize> = queue.iter().map(|e| e.rule_index).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn ties_break_on_rule_index() {
        let mut queue = PendingQueue::new();
        queue.insert(occurrence(2, 10));
        queue.insert(occurrence(0, 10));
        queue.insert(occurrence(1, 10));
        let order: Vec<usize> = queue.iter().map(|e| e.rule_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn prune_is_a_prefix_trim() {
        let mut queue = PendingQueue::new();
        for i in 0..4 {
            queue.insert(occurrence(i, i as i64 * 10));
        }
        let now = occurrence(0, 15).fires_at;
        queue.prune_expired(now);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.next().unwrap().rule_index, 2);
    }

    #[test]
    fn prune_drops_entries_at_exactly_now() {
        let mut queue = PendingQueue::new();
        queue.insert(occurrence(0, 10));
        queue.prune_expired(occurrence(0, 10).fires_at);
        assert!(queue.is_empty());
    }

    #[test]
    fn describe_truncates_to_max_lines() {
        let mut queue = PendingQueue::new();
        for i in 0..7 {
            queue.insert(occurrence(i, i as i64));
        }
        let text = queue.describe(5);
        assert_eq!(text.lines().count(), 5);
        assert!(text.ends_with("(+2 more)"));
    }

    #[test]
    fn describe_without_truncation() {
        let mut queue = PendingQueue::new();
        for i in 0..3 {
            queue.insert(occurrence(i, i as i64));
        }
        let text = queue.describe(5);
        assert_eq!(text.lines().count(), 3);
        assert!(!text.contains("more"));
    }

    #[test]
    fn describe_empty_state() {
        assert_eq!(PendingQueue::new().describe(5), EMPTY_STATE);
    }
}
