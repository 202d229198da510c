//! Rolling receiver statistics for the periodic status line.

use crate::jitter::PlayoutStats;

/// How often the sink logs its status line (ms).
const REPORT_INTERVAL_MS: f64 = 5_000.0;

pub struct ReceiverStats {
    last_report_at: f64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self {
            last_report_at: 0.0,
        }
    }

    pub fn should_report(&mut self, local_now: f64) -> bool {
        if local_now - self.last_report_at >= REPORT_INTERVAL_MS {
            self.last_report_at = local_now;
            true
        } else {
            false
        }
    }

    pub fn format_status_line(
        &self,
        playout: &PlayoutStats,
        buffered: usize,
        offset_ms: f64,
        rtt_ms: f64,
        drift_ms_per_s: f64,
    ) -> String {
        format!(
            "recv: {} | dropped: {} | late: {} | buffered: {} | \
             off: {:+.2} ms | rtt: {:.2} ms | drift: {:+.2} ms/s",
            playout.received, playout.dropped, playout.late, buffered, offset_ms, rtt_ms,
            drift_ms_per_s,
        )
    }
}

impl Default for ReceiverStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_are_throttled() {
        let mut stats = ReceiverStats::new();
        assert!(stats.should_report(REPORT_INTERVAL_MS));
        assert!(!stats.should_report(REPORT_INTERVAL_MS + 100.0));
        assert!(stats.should_report(REPORT_INTERVAL_MS * 2.0));
    }

    #[test]
    fn status_line_contains_counters() {
        let stats = ReceiverStats::new();
        let line = stats.format_status_line(
            &PlayoutStats {
                received: 10,
                dropped: 2,
                late: 1,
            },
            4,
            0.5,
            2.0,
            -0.1,
        );
        assert!(line.contains("recv: 10"));
        assert!(line.contains("dropped: 2"));
        assert!(line.contains("late: 1"));
    }
}
