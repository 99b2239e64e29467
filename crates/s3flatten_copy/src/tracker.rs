//! Completion tracking for one copy run.
//!
//! The tracker is the only owner of the outstanding-key set; every update
//! arrives as a message on the listing branch, the listing-failure channel or
//! the outcome stream.

use std::collections::HashSet;
use std::time::Duration;

use async_channel::Receiver;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::report::{ReportCopy, ReportCopyBuilder};
use crate::spec::{CopyRunError, EnumCopyStatus, SpecCopyOutcome};

/// Tracker state after each transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EnumTrackerState {
    Running,
    Succeeded,
    Failed(CopyRunError),
}

#[derive(Debug)]
pub(crate) struct CompletionTracker {
    set_outstanding: HashSet<String>,
    /// Keys whose outcome was consumed before their registration.
    set_completed_unlisted: HashSet<String>,
    if_listing_closed: bool,
    if_outcomes_closed: bool,
    builder_cp_report: ReportCopyBuilder,
}

impl CompletionTracker {
    pub(crate) fn new() -> Self {
        Self {
            set_outstanding: HashSet::new(),
            set_completed_unlisted: HashSet::new(),
            if_listing_closed: false,
            if_outcomes_closed: false,
            builder_cp_report: ReportCopyBuilder::default(),
        }
    }

    fn state_if_finished(&self) -> EnumTrackerState {
        if !self.if_listing_closed {
            return EnumTrackerState::Running;
        }
        if self.set_outstanding.is_empty() {
            return EnumTrackerState::Succeeded;
        }
        if self.if_outcomes_closed {
            return EnumTrackerState::Failed(CopyRunError::Pipeline(format!(
                "copy workers exited with {} keys outstanding",
                self.set_outstanding.len()
            )));
        }
        EnumTrackerState::Running
    }

    /// A key arrived on the listing branch.
    pub(crate) fn on_listed(&mut self, key_src: String) -> EnumTrackerState {
        self.builder_cp_report.add_listed();
        if !self.set_completed_unlisted.remove(&key_src) {
            self.set_outstanding.insert(key_src);
        }
        EnumTrackerState::Running
    }

    /// The listing stopped on a failed page.
    pub(crate) fn on_list_failed(&mut self, err: CopyRunError) -> EnumTrackerState {
        error!("{err}");
        EnumTrackerState::Failed(err)
    }

    pub(crate) fn on_listing_closed(&mut self) -> EnumTrackerState {
        self.if_listing_closed = true;
        self.state_if_finished()
    }

    pub(crate) fn on_outcome(&mut self, spec_outcome: SpecCopyOutcome) -> EnumTrackerState {
        match spec_outcome.res_copy {
            Ok(EnumCopyStatus::Copied) => self.builder_cp_report.add_copied(),
            Ok(EnumCopyStatus::Skipped) => self.builder_cp_report.add_skipped(),
            Err(err) => {
                error!(key = %spec_outcome.key_src, "{err}");
                return EnumTrackerState::Failed(err);
            }
        }
        if !self.set_outstanding.remove(&spec_outcome.key_src) {
            self.set_completed_unlisted.insert(spec_outcome.key_src);
        }
        self.state_if_finished()
    }

    /// Every worker has exited. Once the listing is closed too, anything
    /// still outstanding will never complete.
    pub(crate) fn on_outcomes_closed(&mut self) -> EnumTrackerState {
        self.if_outcomes_closed = true;
        self.state_if_finished()
    }

    pub(crate) fn cnt_outstanding(&self) -> usize {
        self.set_outstanding.len()
    }

    pub(crate) fn snapshot(&self) -> ReportCopy {
        self.builder_cp_report.snapshot()
    }

    /// Drive the tracker until the run succeeds or fails.
    ///
    /// A listing failure is polled ahead of everything else so it wins over
    /// keys still buffered on the listing branch.
    pub(crate) async fn watch(
        mut self,
        rx_list_failure: Receiver<CopyRunError>,
        rx_listed: Receiver<String>,
        rx_outcome: Receiver<SpecCopyOutcome>,
        interval_report: Duration,
    ) -> Result<ReportCopy, CopyRunError> {
        let mut ticker_report = time::interval_at(Instant::now() + interval_report, interval_report);
        ticker_report.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut if_lister_done = false;

        let mut state = EnumTrackerState::Running;
        while state == EnumTrackerState::Running {
            state = tokio::select! {
                biased;
                res_failure = rx_list_failure.recv(), if !if_lister_done => match res_failure {
                    Ok(err) => self.on_list_failed(err),
                    Err(_) => {
                        if_lister_done = true;
                        EnumTrackerState::Running
                    }
                },
                _ = ticker_report.tick() => {
                    info!(outstanding = self.cnt_outstanding(), "{}", self.snapshot());
                    EnumTrackerState::Running
                }
                res_listed = rx_listed.recv(), if !self.if_listing_closed => match res_listed {
                    Ok(key_src) => self.on_listed(key_src),
                    Err(_) => self.on_listing_closed(),
                },
                res_outcome = rx_outcome.recv(), if !self.if_outcomes_closed => match res_outcome {
                    Ok(spec_outcome) => self.on_outcome(spec_outcome),
                    Err(_) => self.on_outcomes_closed(),
                },
            };
        }

        let report_copy = self.snapshot();
        info!("{report_copy}");
        match state {
            EnumTrackerState::Failed(err) => Err(err),
            _ => Ok(report_copy),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CompletionTracker, EnumTrackerState};
    use crate::spec::{CopyRunError, EnumCopyStatus, SpecCopyOutcome};

    fn outcome_ok(key: &str) -> SpecCopyOutcome {
        SpecCopyOutcome {
            key_src: key.to_string(),
            res_copy: Ok(EnumCopyStatus::Copied),
        }
    }

    fn outcome_err(key: &str) -> SpecCopyOutcome {
        SpecCopyOutcome {
            key_src: key.to_string(),
            res_copy: Err(CopyRunError::Copy {
                key: key.to_string(),
                message: "AccessDenied".to_string(),
            }),
        }
    }

    fn list_err() -> CopyRunError {
        CopyRunError::List {
            bucket: "b".into(),
            prefix: "a/".into(),
            message: "boom".into(),
        }
    }

    #[test]
    fn tracker_succeeds_only_after_listing_closed_and_all_copied() {
        let mut tracker = CompletionTracker::new();
        assert_eq!(tracker.on_listed("a/1".into()), EnumTrackerState::Running);
        assert_eq!(tracker.on_listed("a/2".into()), EnumTrackerState::Running);
        assert_eq!(tracker.on_outcome(outcome_ok("a/1")), EnumTrackerState::Running);
        assert_eq!(tracker.on_outcome(outcome_ok("a/2")), EnumTrackerState::Running);
        assert_eq!(tracker.on_listing_closed(), EnumTrackerState::Succeeded);
        assert_eq!(tracker.snapshot().cnt_copied, 2);
    }

    #[test]
    fn tracker_succeeds_on_last_outcome_after_close() {
        let mut tracker = CompletionTracker::new();
        tracker.on_listed("a/1".into());
        assert_eq!(tracker.on_listing_closed(), EnumTrackerState::Running);
        assert_eq!(tracker.on_outcome(outcome_ok("a/1")), EnumTrackerState::Succeeded);
    }

    #[test]
    fn tracker_succeeds_on_empty_listing() {
        let mut tracker = CompletionTracker::new();
        assert_eq!(tracker.on_listing_closed(), EnumTrackerState::Succeeded);
    }

    #[test]
    fn tracker_fails_on_first_error_with_keys_outstanding() {
        let mut tracker = CompletionTracker::new();
        tracker.on_listed("a/1".into());
        tracker.on_listed("a/2".into());
        tracker.on_listed("a/3".into());
        let state = tracker.on_outcome(outcome_err("a/2"));
        assert!(matches!(
            state,
            EnumTrackerState::Failed(CopyRunError::Copy { ref key, .. }) if key == "a/2"
        ));
        assert_eq!(tracker.cnt_outstanding(), 2);
    }

    #[test]
    fn tracker_fails_on_listing_error() {
        let mut tracker = CompletionTracker::new();
        tracker.on_listed("a/1".into());
        let err = list_err();
        assert_eq!(
            tracker.on_list_failed(err.clone()),
            EnumTrackerState::Failed(err)
        );
    }

    #[test]
    fn tracker_fails_when_workers_vanish_with_keys_outstanding() {
        let mut tracker = CompletionTracker::new();
        tracker.on_listed("a/1".into());
        tracker.on_listing_closed();
        assert!(matches!(
            tracker.on_outcomes_closed(),
            EnumTrackerState::Failed(CopyRunError::Pipeline(_))
        ));
    }

    #[test]
    fn tracker_accepts_outcome_before_its_key_is_listed() {
        let mut tracker = CompletionTracker::new();
        assert_eq!(tracker.on_outcome(outcome_ok("a/1")), EnumTrackerState::Running);
        assert_eq!(tracker.on_listed("a/1".into()), EnumTrackerState::Running);
        assert_eq!(tracker.cnt_outstanding(), 0);
        assert_eq!(tracker.on_listing_closed(), EnumTrackerState::Succeeded);
        assert_eq!(tracker.snapshot().cnt_listed, 1);
        assert_eq!(tracker.snapshot().cnt_copied, 1);
    }

    #[test]
    fn tracker_waits_for_listing_close_after_outcomes_close() {
        let mut tracker = CompletionTracker::new();
        tracker.on_listed("a/1".into());
        tracker.on_outcome(outcome_ok("a/1"));
        assert_eq!(tracker.on_outcomes_closed(), EnumTrackerState::Running);
        assert_eq!(tracker.on_listing_closed(), EnumTrackerState::Succeeded);

        let mut tracker = CompletionTracker::new();
        tracker.on_listed("a/1".into());
        assert_eq!(tracker.on_outcomes_closed(), EnumTrackerState::Running);
        assert!(matches!(
            tracker.on_listing_closed(),
            EnumTrackerState::Failed(CopyRunError::Pipeline(_))
        ));
    }

    #[tokio::test]
    async fn watch_registers_key_before_its_outcome() {
        let (tx_failure, rx_failure) = async_channel::bounded::<CopyRunError>(1);
        let (tx_listed, rx_listed) = async_channel::bounded(4);
        let (tx_outcome, rx_outcome) = async_channel::bounded(4);

        tx_listed.send("a/1".to_string()).await.expect("send key");
        tx_outcome.send(outcome_ok("a/1")).await.expect("send outcome");
        drop(tx_failure);
        drop(tx_listed);
        drop(tx_outcome);

        let report = CompletionTracker::new()
            .watch(rx_failure, rx_listed, rx_outcome, Duration::from_secs(10))
            .await
            .expect("run succeeds");
        assert_eq!(report.cnt_listed, 1);
        assert_eq!(report.cnt_copied, 1);
    }

    #[tokio::test]
    async fn watch_returns_first_error_without_draining() {
        let (_tx_failure, rx_failure) = async_channel::bounded::<CopyRunError>(1);
        let (tx_listed, rx_listed) = async_channel::bounded(4);
        let (tx_outcome, rx_outcome) = async_channel::bounded(4);

        tx_listed.send("a/1".to_string()).await.expect("send key");
        tx_listed.send("a/2".to_string()).await.expect("send key");
        tx_outcome.send(outcome_err("a/1")).await.expect("send outcome");

        let err = CompletionTracker::new()
            .watch(rx_failure, rx_listed, rx_outcome, Duration::from_secs(10))
            .await
            .expect_err("run fails");
        assert!(matches!(err, CopyRunError::Copy { ref key, .. } if key == "a/1"));
        drop(tx_listed);
        drop(tx_outcome);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_keeps_running_across_report_ticks() {
        let (tx_failure, rx_failure) = async_channel::bounded::<CopyRunError>(1);
        let (tx_listed, rx_listed) = async_channel::bounded(4);
        let (tx_outcome, rx_outcome) = async_channel::bounded(4);

        let handle = tokio::spawn(
            CompletionTracker::new().watch(
                rx_failure,
                rx_listed,
                rx_outcome,
                Duration::from_millis(50),
            ),
        );
        tx_listed.send("a/1".to_string()).await.expect("send key");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_finished());

        drop(tx_failure);
        drop(tx_listed);
        tx_outcome.send(outcome_ok("a/1")).await.expect("send outcome");
        let report = handle.await.expect("join").expect("run succeeds");
        assert_eq!(report.cnt_copied, 1);
    }

    #[tokio::test]
    async fn watch_prefers_listing_failure_over_buffered_keys() {
        let (tx_failure, rx_failure) = async_channel::bounded(1);
        let (tx_listed, rx_listed) = async_channel::bounded(4);
        let (tx_outcome, rx_outcome) = async_channel::bounded::<SpecCopyOutcome>(4);

        tx_listed.send("a/1".to_string()).await.expect("send key");
        tx_listed.send("a/2".to_string()).await.expect("send key");
        tx_failure.send(list_err()).await.expect("send failure");

        let err = CompletionTracker::new()
            .watch(rx_failure, rx_listed.clone(), rx_outcome, Duration::from_secs(10))
            .await
            .expect_err("run fails");
        assert_eq!(err, list_err());
        assert_eq!(rx_listed.len(), 2);
        drop(tx_listed);
        drop(tx_outcome);
    }
}
