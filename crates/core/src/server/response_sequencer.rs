use std::collections::BTreeMap;
use std::time::Instant;

use crate::request::response::error_bytes;

/// Releases one connection's responses in request order.
///
/// Every request takes the next sequence number when it is submitted.
/// Completions may arrive in any order; [`drain_ready`](Self::drain_ready)
/// only hands out the contiguous run starting at the oldest unreleased
/// sequence. A request whose deadline passes is completed with `ERROR`,
/// and its real result is dropped when it finally arrives.
#[derive(Debug, Default)]
pub struct ResponseSequencer {
    next_sequence: u64,
    next_release: u64,
    completed: BTreeMap<u64, Vec<u8>>,
    deadlines: BTreeMap<u64, Instant>,
}

impl ResponseSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the sequence number for a new request.
    pub fn submit(&mut self, deadline: Option<Instant>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if let Some(deadline) = deadline {
            self.deadlines.insert(sequence, deadline);
        }
        sequence
    }

    /// Stores the response for `sequence`. Returns `false` and drops the
    /// bytes when the sequence is unknown, expired or already completed.
    pub fn complete(&mut self, sequence: u64, response: Vec<u8>) -> bool {
        if sequence < self.next_release
            || sequence >= self.next_sequence
            || self.completed.contains_key(&sequence)
        {
            return false;
        }
        self.deadlines.remove(&sequence);
        self.completed.insert(sequence, response);
        true
    }

    /// Completes every request whose deadline is at or before `now` with
    /// `ERROR`. Returns the expired sequence numbers.
    pub fn expire(&mut self, now: Instant) -> Vec<u64> {
        let expired: Vec<u64> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(sequence, _)| *sequence)
            .collect();
        for sequence in &expired {
            self.deadlines.remove(sequence);
            self.completed.insert(*sequence, error_bytes());
        }
        expired
    }

    /// Removes and returns the responses that can be sent now, in order.
    pub fn drain_ready(&mut self) -> Vec<Vec<u8>> {
        let mut ready = Vec::new();
        while let Some(response) = self.completed.remove(&self.next_release) {
            ready.push(response);
            self.next_release += 1;
        }
        ready
    }

    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Requests submitted but not yet released.
    pub fn outstanding(&self) -> u64 {
        self.next_sequence - self.next_release
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_in_order_completion_releases_immediately() {
        let mut seq = ResponseSequencer::new();
        let a = seq.submit(None);
        assert!(seq.complete(a, b"a".to_vec()));
        assert_eq!(seq.drain_ready(), vec![b"a".to_vec()]);
        assert_eq!(seq.outstanding(), 0);
    }

    #[test]
    fn test_out_of_order_completion_is_held_back() {
        let mut seq = ResponseSequencer::new();
        let a = seq.submit(None);
        let b = seq.submit(None);
        let c = seq.submit(None);

        seq.complete(c, b"c".to_vec());
        seq.complete(b, b"b".to_vec());
        assert!(seq.drain_ready().is_empty());
        assert_eq!(seq.outstanding(), 3);

        seq.complete(a, b"a".to_vec());
        assert_eq!(
            seq.drain_ready(),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
    }

    #[test]
    fn test_duplicate_and_unknown_completions_are_dropped() {
        let mut seq = ResponseSequencer::new();
        let a = seq.submit(None);

        assert!(!seq.complete(a + 1, b"future".to_vec()));
        assert!(seq.complete(a, b"a".to_vec()));
        assert!(!seq.complete(a, b"again".to_vec()));
        seq.drain_ready();
        assert!(!seq.complete(a, b"late".to_vec()));
    }

    #[test]
    fn test_expired_request_yields_error_and_drops_late_result() {
        let start = Instant::now();
        let mut seq = ResponseSequencer::new();
        let slow = seq.submit(Some(start + Duration::from_millis(10)));
        let fast = seq.submit(Some(start + Duration::from_secs(60)));
        seq.complete(fast, b"fast".to_vec());

        assert!(seq.expire(start).is_empty());
        assert_eq!(seq.expire(start + Duration::from_millis(10)), vec![slow]);
        assert!(!seq.complete(slow, b"slow".to_vec()));
        assert_eq!(
            seq.drain_ready(),
            vec![b"ERROR".to_vec(), b"fast".to_vec()]
        );
    }

    #[test]
    fn test_earliest_deadline_tracks_in_flight_only() {
        let start = Instant::now();
        let mut seq = ResponseSequencer::new();
        assert!(seq.earliest_deadline().is_none());

        let a = seq.submit(Some(start + Duration::from_secs(5)));
        seq.submit(Some(start + Duration::from_secs(9)));
        assert_eq!(seq.earliest_deadline(), Some(start + Duration::from_secs(5)));

        seq.complete(a, vec![]);
        assert_eq!(seq.earliest_deadline(), Some(start + Duration::from_secs(9)));
    }
}
