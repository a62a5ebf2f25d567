//! Event loop driving one pair
//!
//! [`WatchMachine`] decides when to run a pass. It is a plain state machine
//! fed with explicit instants, so its timing rules are testable without a
//! filesystem or a clock. [`run_watch_loop`] connects it to a
//! [`FileWatcher`] and a [`SyncPair`].
//!
//! Timing rules:
//! - events for a side are coalesced until that side has been quiet for the
//!   settle window, then one pass runs for it
//! - events arriving while a pass runs are queued, never dropped
//! - after a pass rewrites a file, events for that file are dropped for the
//!   suppression window; if any were dropped, the file is examined once more
//!   when the window closes (the pass then skips it if it still holds our
//!   own write)

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::ownership::Side;
use crate::pair::SyncPair;
use crate::watch::{FileWatcher, WatchEvent};

/// Default quiet period before a queued side is reconciled (in milliseconds).
pub const DEFAULT_SETTLE_MS: u64 = 100;

/// Default window during which change events for a file we just wrote are
/// treated as echoes (in milliseconds).
pub const DEFAULT_SUPPRESS_MS: u64 = 1500;

/// Timing of the watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub settle: Duration,
    pub suppress: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            suppress: Duration::from_millis(DEFAULT_SUPPRESS_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Reconciling(Side),
    Suppressing { written: Side, until: Instant },
}

/// What happened to an observed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Queued,
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Suppression {
    until: Instant,
    /// Latest event dropped during the window
    dropped: Option<Instant>,
}

/// Scheduling state of one pair. Arrays are indexed by `Side::index`.
#[derive(Debug, Clone)]
pub struct WatchMachine {
    timing: LoopTiming,
    reconciling: Option<Side>,
    /// Time of the latest unreconciled event per side
    pending: [Option<Instant>; 2],
    suppressed: [Option<Suppression>; 2],
}

impl WatchMachine {
    pub fn new(timing: LoopTiming) -> Self {
        Self {
            timing,
            reconciling: None,
            pending: [None, None],
            suppressed: [None, None],
        }
    }

    pub fn state(&self) -> WatchState {
        if let Some(side) = self.reconciling {
            return WatchState::Reconciling(side);
        }
        Side::ALL
            .into_iter()
            .find_map(|side| {
                self.suppressed[side.index()].map(|s| WatchState::Suppressing {
                    written: side,
                    until: s.until,
                })
            })
            .unwrap_or(WatchState::Idle)
    }

    pub fn is_pending(&self, side: Side) -> bool {
        self.pending[side.index()].is_some()
    }

    /// Record a change event for `side`.
    pub fn observe(&mut self, side: Side, now: Instant) -> Observation {
        self.expire(now);
        let i = side.index();
        if let Some(suppression) = &mut self.suppressed[i] {
            suppression.dropped = Some(now);
            return Observation::Suppressed;
        }
        self.pending[i] = Some(now);
        Observation::Queued
    }

    /// The side to reconcile now, if any. Moves the machine into
    /// `Reconciling`; the caller must follow up with [`finish_pass`] or
    /// [`fail_pass`].
    ///
    /// [`finish_pass`]: WatchMachine::finish_pass
    /// [`fail_pass`]: WatchMachine::fail_pass
    pub fn next_pass(&mut self, now: Instant) -> Option<Side> {
        self.expire(now);
        if self.reconciling.is_some() {
            return None;
        }
        let side = Side::ALL
            .into_iter()
            .filter(|side| self.suppressed[side.index()].is_none())
            .filter_map(|side| self.pending[side.index()].map(|at| (side, at)))
            .filter(|(_, at)| now >= *at + self.timing.settle)
            .min_by_key(|(_, at)| *at)
            .map(|(side, _)| side)?;

        self.pending[side.index()] = None;
        self.reconciling = Some(side);
        Some(side)
    }

    /// End the running pass. `echo` is the file the pass rewrote with
    /// nothing but its own changes, if any.
    pub fn finish_pass(&mut self, echo: Option<Side>, now: Instant) {
        self.reconciling = None;
        if let Some(side) = echo {
            self.suppressed[side.index()] = Some(Suppression {
                until: now + self.timing.suppress,
                dropped: None,
            });
        }
    }

    /// End the running pass without a write. The next event retries.
    pub fn fail_pass(&mut self) {
        self.reconciling = None;
    }

    /// When the machine next needs attention without any new event.
    pub fn next_deadline(&self) -> Option<Instant> {
        Side::ALL
            .into_iter()
            .filter_map(|side| match self.suppressed[side.index()] {
                Some(s) if s.dropped.is_some() || self.pending[side.index()].is_some() => {
                    Some(s.until)
                }
                Some(_) => None,
                None => self.pending[side.index()].map(|at| at + self.timing.settle),
            })
            .min()
    }

    fn expire(&mut self, now: Instant) {
        for side in Side::ALL {
            let i = side.index();
            let Some(suppression) = self.suppressed[i] else {
                continue;
            };
            if now < suppression.until {
                continue;
            }
            self.suppressed[i] = None;
            if suppression.dropped.is_some() {
                debug!(side = %side, "Re-examining file after suppression window");
                self.pending[i] = self.pending[i].max(suppression.dropped);
            }
        }
    }
}

/// Keep `pair` in sync until `cancel` fires.
///
/// Errors from a pass are logged and the loop carries on; only a stopped
/// watcher ends the loop with an error.
pub async fn run_watch_loop(
    mut pair: SyncPair,
    mut watcher: FileWatcher,
    timing: LoopTiming,
    cancel: CancellationToken,
) -> Result<()> {
    let mut machine = WatchMachine::new(timing);
    info!(
        bib = %pair.path(Side::Bib).display(),
        doc = %pair.path(Side::Doc).display(),
        "Watching pair"
    );

    loop {
        while let Some(side) = machine.next_pass(Instant::now()) {
            match pair.run_pass(side) {
                Ok(report) => {
                    for err in &report.errors {
                        warn!(error = %err, "Malformed record left untouched");
                    }
                    debug!(side = %side, result = ?report.result, "Pass finished");
                    machine.finish_pass(report.echo_side(), Instant::now());
                }
                Err(e) => {
                    error!(side = %side, error = %e, "Reconcile pass failed");
                    machine.fail_pass();
                }
            }
        }

        let deadline = machine.next_deadline();
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(bib = %pair.path(Side::Bib).display(), "Stopping watch loop");
                return Ok(());
            }
            event = watcher.recv() => match event {
                Some(WatchEvent::Modified(side)) => {
                    if machine.observe(side, Instant::now()) == Observation::Suppressed {
                        debug!(side = %side, "Ignoring change event for our own write");
                    }
                }
                None => return Err(Error::Watch("filesystem watcher stopped".to_string())),
            },
            _ = sleep_until(deadline) => {}
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
