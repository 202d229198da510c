//! Sink-side jitter buffer.
//!
//! An ordered queue of future-dated frames keyed by local playout time.
//! Insertion is by binary-search placement rather than arrival order: the
//! transport is ordered, but the same buffer also serves connections that may
//! present reordering (reconnects, higher-layer retransmit queues), so order
//! is restored here defensively.
//!
//! Incoming frames pass four checks in order: sequence-gap accounting,
//! late-drop, ordered insert, and a front-trim whenever the buffered playout
//! span exceeds the configured maximum. Newest data is the most valuable, so
//! overflow always evicts the oldest frames.

use log::{debug, warn};
use std::collections::VecDeque;

/// A decoded frame scheduled for playout.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedFrame {
    pub sequence: u64,
    pub play_at: f64,
    pub data: Vec<u8>,
}

/// Counters surfaced through the periodic status line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayoutStats {
    /// Frames accepted into the buffer.
    pub received: u64,
    /// Frames lost to sequence gaps or evicted on overflow.
    pub dropped: u64,
    /// Frames discarded because their deadline had already passed.
    pub late: u64,
}

pub struct JitterBuffer {
    frames: VecDeque<BufferedFrame>,
    max_span_ms: f64,
    last_seq: Option<u64>,
    stats: PlayoutStats,
}

impl JitterBuffer {
    pub fn new(max_span_ms: f64) -> Self {
        Self {
            frames: VecDeque::new(),
            max_span_ms,
            last_seq: None,
            stats: PlayoutStats::default(),
        }
    }

    /// Offer one frame. `play_at` is the precomputed local playout deadline;
    /// `local_now` is the insertion-time clock reading.
    pub fn insert(&mut self, sequence: u64, play_at: f64, data: Vec<u8>, local_now: f64) {
        // 1. Sequence-gap accounting. Only positive gaps count as losses;
        //    lastSeq follows the stream regardless.
        if let Some(last) = self.last_seq {
            if sequence > last + 1 {
                let gap = sequence - last - 1;
                self.stats.dropped += gap;
                debug!("sequence gap of {} before #{}", gap, sequence);
            }
        }
        self.last_seq = Some(sequence);

        // 2. Late-drop: a frame whose deadline already passed never enters.
        if play_at < local_now {
            self.stats.late += 1;
            if self.stats.late % 100 == 1 {
                warn!(
                    "frame #{} arrived {:.1} ms late ({} late so far)",
                    sequence,
                    local_now - play_at,
                    self.stats.late
                );
            }
            return;
        }

        // 3. Ordered insert, ties broken by sequence.
        let index = self.frames.partition_point(|frame| {
            frame.play_at < play_at
                || (frame.play_at == play_at && frame.sequence <= sequence)
        });
        self.frames.insert(
            index,
            BufferedFrame {
                sequence,
                play_at,
                data,
            },
        );
        self.stats.received += 1;

        // 4. Overflow trim from the front until the span fits.
        while self.span_ms() > self.max_span_ms {
            self.frames.pop_front();
            self.stats.dropped += 1;
        }
    }

    /// Pop the front frame once its deadline has arrived.
    pub fn pop_due(&mut self, local_now: f64) -> Option<BufferedFrame> {
        if self.frames.front()?.play_at <= local_now {
            self.frames.pop_front()
        } else {
            None
        }
    }

    /// Playout-time span currently buffered.
    pub fn span_ms(&self) -> f64 {
        match (self.frames.front(), self.frames.back()) {
            (Some(first), Some(last)) => last.play_at - first.play_at,
            _ => 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn stats(&self) -> PlayoutStats {
        self.stats
    }

    #[cfg(test)]
    fn is_sorted(&self) -> bool {
        self.frames
            .iter()
            .zip(self.frames.iter().skip(1))
            .all(|(a, b)| {
                a.play_at < b.play_at || (a.play_at == b.play_at && a.sequence < b.sequence)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_data(tag: u8) -> Vec<u8> {
        vec![tag; 4]
    }

    #[test]
    fn sequence_gaps_are_counted() {
        let mut buffer = JitterBuffer::new(200.0);
        for seq in 0..10u64 {
            buffer.insert(seq, 100.0 + seq as f64 * 20.0, frame_data(0), 0.0);
        }
        // 10..=19 lost
        for seq in 20..30u64 {
            buffer.insert(seq, 500.0 + seq as f64 * 20.0, frame_data(0), 0.0);
        }
        assert_eq!(buffer.stats().dropped, 10);
        assert_eq!(buffer.last_seq, Some(29));
        assert_eq!(buffer.stats().late, 0);
    }

    #[test]
    fn reordered_sequence_does_not_count_negative_gap() {
        let mut buffer = JitterBuffer::new(200.0);
        buffer.insert(5, 100.0, frame_data(0), 0.0);
        buffer.insert(3, 90.0, frame_data(0), 0.0);
        assert_eq!(buffer.stats().dropped, 0);
        assert_eq!(buffer.last_seq, Some(3));
    }

    #[test]
    fn late_frame_is_discarded_not_inserted() {
        let mut buffer = JitterBuffer::new(200.0);
        buffer.insert(0, 95.0, frame_data(1), 100.0);
        assert_eq!(buffer.stats().late, 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.stats().received, 0);
    }

    #[test]
    fn insert_restores_order() {
        let mut buffer = JitterBuffer::new(1000.0);
        for (seq, play_at) in [(0u64, 140.0), (1, 100.0), (2, 180.0), (3, 120.0), (4, 160.0)] {
            buffer.insert(seq, play_at, frame_data(seq as u8), 0.0);
            assert!(buffer.is_sorted());
        }
        let order: Vec<u64> = std::iter::from_fn(|| buffer.pop_due(f64::MAX))
            .map(|f| f.sequence)
            .collect();
        assert_eq!(order, vec![1, 3, 0, 4, 2]);
    }

    #[test]
    fn equal_deadlines_tie_break_by_sequence() {
        let mut buffer = JitterBuffer::new(1000.0);
        buffer.insert(7, 100.0, frame_data(7), 0.0);
        buffer.insert(5, 100.0, frame_data(5), 0.0);
        buffer.insert(6, 100.0, frame_data(6), 0.0);
        let order: Vec<u64> = std::iter::from_fn(|| buffer.pop_due(f64::MAX))
            .map(|f| f.sequence)
            .collect();
        assert_eq!(order, vec![5, 6, 7]);
    }

    #[test]
    fn overflow_trims_oldest_until_span_fits() {
        let mut buffer = JitterBuffer::new(200.0);
        // 20 frames spanning 380 ms, all far in the future.
        for seq in 0..20u64 {
            buffer.insert(seq, 1000.0 + seq as f64 * 20.0, frame_data(0), 0.0);
        }
        assert!(buffer.span_ms() <= 200.0);
        // Oldest frames went first; the newest survives.
        assert_eq!(buffer.frames.back().unwrap().sequence, 19);
        let evicted = 20 - buffer.len() as u64;
        assert!(evicted > 0);
        assert_eq!(buffer.stats().dropped, evicted);
        assert_eq!(buffer.frames.front().unwrap().sequence as usize, evicted as usize);
    }

    #[test]
    fn span_never_exceeds_max_under_random_insertions() {
        let mut buffer = JitterBuffer::new(200.0);
        let mut state: u64 = 12345;
        for seq in 0..500u64 {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let play_at = 1_000.0 + (state % 2_000) as f64;
            buffer.insert(seq, play_at, frame_data(0), 0.0);
            assert!(buffer.span_ms() <= 200.0, "span {}", buffer.span_ms());
            assert!(buffer.is_sorted());
        }
    }

    #[test]
    fn nothing_pops_before_its_deadline() {
        let mut buffer = JitterBuffer::new(200.0);
        buffer.insert(0, 100.0, frame_data(0), 0.0);
        buffer.insert(1, 120.0, frame_data(1), 0.0);
        assert!(buffer.pop_due(99.9).is_none());
        assert_eq!(buffer.pop_due(100.0).unwrap().sequence, 0);
        assert!(buffer.pop_due(119.0).is_none());
        assert_eq!(buffer.pop_due(125.0).unwrap().sequence, 1);
    }
}
