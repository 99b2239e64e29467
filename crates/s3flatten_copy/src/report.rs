//! Copy report model and mutable report builder.

use std::fmt;
use std::time::{Duration, Instant};

/// Counters and timing for one `copy_flatten` run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReportCopy {
    /// Keys that passed the listing filters.
    pub cnt_listed: u64,
    /// Keys copied successfully.
    pub cnt_copied: u64,
    /// Keys skipped (dry-run).
    pub cnt_skipped: u64,
    /// Wall time since the pipeline started.
    pub elapsed: Duration,
}

impl ReportCopy {
    /// Completed keys (copied or skipped) per second.
    pub fn items_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.cnt_copied + self.cnt_skipped) as f64 / secs
    }

    /// Human-readable one-line summary.
    pub fn format(&self, prefix: &str) -> String {
        format!(
            "{prefix} Copied {} items in {:.3?}, {:.2} items/sec (listed={} skipped={})",
            self.cnt_copied,
            self.elapsed,
            self.items_per_sec(),
            self.cnt_listed,
            self.cnt_skipped
        )
    }
}

impl fmt::Display for ReportCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format("[COPY]"))
    }
}

/// Mutable accumulator owned by the completion tracker.
#[derive(Debug, Clone)]
pub(crate) struct ReportCopyBuilder {
    cnt_listed: u64,
    cnt_copied: u64,
    cnt_skipped: u64,
    time_start: Instant,
}

impl Default for ReportCopyBuilder {
    fn default() -> Self {
        Self {
            cnt_listed: 0,
            cnt_copied: 0,
            cnt_skipped: 0,
            time_start: Instant::now(),
        }
    }
}

impl ReportCopyBuilder {
    pub(crate) fn add_listed(&mut self) {
        self.cnt_listed += 1;
    }

    pub(crate) fn add_copied(&mut self) {
        self.cnt_copied += 1;
    }

    pub(crate) fn add_skipped(&mut self) {
        self.cnt_skipped += 1;
    }

    /// Current counters with elapsed time measured now.
    pub(crate) fn snapshot(&self) -> ReportCopy {
        ReportCopy {
            cnt_listed: self.cnt_listed,
            cnt_copied: self.cnt_copied,
            cnt_skipped: self.cnt_skipped,
            elapsed: self.time_start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ReportCopy, ReportCopyBuilder};

    #[test]
    fn report_copy_format_shows_count_elapsed_and_rate() {
        let report = ReportCopy {
            cnt_listed: 5,
            cnt_copied: 4,
            cnt_skipped: 0,
            elapsed: Duration::from_secs(2),
        };

        assert_eq!(report.items_per_sec(), 2.0);
        let txt = report.format("[COPY]");
        assert_eq!(
            txt,
            "[COPY] Copied 4 items in 2.000s, 2.00 items/sec (listed=5 skipped=0)"
        );
        assert_eq!(report.to_string(), txt);
    }

    #[test]
    fn report_copy_rate_is_zero_without_elapsed_time() {
        let report = ReportCopy {
            cnt_copied: 3,
            ..ReportCopy::default()
        };
        assert_eq!(report.items_per_sec(), 0.0);
    }

    #[test]
    fn report_builder_snapshot_carries_counters() {
        let mut builder = ReportCopyBuilder::default();
        builder.add_listed();
        builder.add_listed();
        builder.add_copied();
        builder.add_skipped();

        let report = builder.snapshot();
        assert_eq!(report.cnt_listed, 2);
        assert_eq!(report.cnt_copied, 1);
        assert_eq!(report.cnt_skipped, 1);
    }
}
