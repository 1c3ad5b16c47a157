//! Scheduler - single-flight で流量制限つきの配送ドライバ
//!
//! # 状態遷移
//! - `trigger()`: Idle なら driver タスクを起動して Running
//! - Running 中の trigger は何回来ても RunningWithPendingRetrigger に畳まれる
//! - サイクル終了後: 自身の再実行要求か保留中の trigger があれば続行、なければ Idle
//!
//! 状態は `watch` チャネルに置くので、`drain()` は Idle になるのを待つだけです。
//! driver が panic しても Idle に戻し、インスタンスは使い続けられます。
//! panic 時に保留中の trigger があれば、Idle ではなく新しい driver で引き継ぎます。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, error};

use crate::domain::SchedulerState;

use super::publisher_loop::PublisherLoop;
use super::rate_limit::RateLimiter;

struct Shared {
    state: watch::Sender<SchedulerState>,
    closed: AtomicBool,
    limiter: RateLimiter,
    /// `None` when no sink is configured: cycles are no-ops.
    publisher: Option<PublisherLoop>,
}

impl Shared {
    /// Run one cycle; returns whether it asked to run again.
    async fn cycle(&self) -> bool {
        let Some(publisher) = &self.publisher else {
            debug!("no sink configured, skipping delivery cycle");
            return false;
        };

        self.limiter.acquire().await;

        match publisher.run_cycle().await {
            Ok(report) => report.wants_rerun(),
            Err(e) => {
                error!(error = %e, "delivery cycle aborted by store error");
                false
            }
        }
    }
}

/// Resets the state to Idle if the driver unwinds or is dropped mid-cycle.
///
/// A panic with a trigger still pending hands over to a fresh driver instead,
/// so the coalesced trigger is not lost.
struct IdleOnDrop {
    shared: Arc<Shared>,
    armed: bool,
}

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if !std::thread::panicking() {
            self.shared.state.send_replace(SchedulerState::Idle);
            return;
        }

        let pending =
            *self.shared.state.borrow() == SchedulerState::RunningWithPendingRetrigger;
        if pending {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                error!("delivery driver panicked, restarting for pending trigger");
                self.shared.state.send_replace(SchedulerState::Running);
                handle.spawn(drive(Arc::clone(&self.shared)));
                return;
            }
        }

        error!("delivery driver panicked, scheduler reset to idle");
        self.shared.state.send_replace(SchedulerState::Idle);
    }
}

async fn drive(shared: Arc<Shared>) {
    let mut guard = IdleOnDrop {
        shared: Arc::clone(&shared),
        armed: true,
    };

    loop {
        let rerun = shared.cycle().await;

        let mut keep_going = false;
        shared.state.send_modify(|state| {
            *state = state.on_cycle_end(rerun);
            keep_going = !state.is_idle();
        });
        if !keep_going {
            break;
        }
        debug!(rerun, "running follow-up delivery cycle");
    }

    guard.armed = false;
}

/// Per-instance delivery scheduler. Cloning shares the same state.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(publisher: Option<PublisherLoop>, limiter: RateLimiter) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            shared: Arc::new(Shared {
                state,
                closed: AtomicBool::new(false),
                limiter,
                publisher,
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.state.borrow()
    }

    /// Target of the configured sink, if delivery is enabled.
    pub fn sink_description(&self) -> Option<String> {
        self.shared.publisher.as_ref().map(|p| p.sink().describe())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Request a delivery cycle. Returns `true` if a new driver task was started.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(&self) -> bool {
        if self.is_closed() {
            debug!("scheduler closed, ignoring trigger");
            return false;
        }

        let mut start = false;
        self.shared.state.send_modify(|state| {
            start = state.is_idle();
            *state = state.on_trigger();
        });

        if start {
            tokio::spawn(drive(Arc::clone(&self.shared)));
        }
        start
    }

    /// Wait until no cycle is running or pending.
    pub async fn drain(&self) {
        let mut rx = self.shared.state.subscribe();
        // the sender lives in `shared`, so the channel cannot close under us
        let _ = rx.wait_for(|state| state.is_idle()).await;
    }

    /// Stop accepting triggers, then wait for in-flight work to finish.
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.drain().await;
    }
}
