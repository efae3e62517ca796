use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::JobKind;

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Once per day at this local wall-clock time.
    Daily(NaiveTime),
    /// Forever at a fixed rate, first fire one period after registration.
    Every(Duration),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Daily(at) => write!(f, "daily at {}", at.format("%H:%M:%S")),
            Trigger::Every(period) => write!(f, "every {}", humantime::format_duration(*period)),
        }
    }
}

/// Identifier handed out by a [`TimerService`] for a live job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobHandle(pub u64);

/// Timer backend driven by [`super::Scheduler`].
///
/// Implementations deliver fires asynchronously; `register` and `unregister`
/// must return without waiting on a pending fire.
pub trait TimerService {
    fn register(&mut self, kind: JobKind, trigger: Trigger) -> JobHandle;
    /// Unknown handles are ignored.
    fn unregister(&mut self, handle: JobHandle);
    /// Begins firing registered jobs.
    fn start(&mut self);
    /// Cancels every job; nothing fires afterwards.
    fn shutdown(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
}

struct TimerJob {
    kind: JobKind,
    trigger: Trigger,
    cancel: Option<CancellationToken>,
}

/// One tokio task per live job; fires are pushed onto an unbounded channel.
pub struct TokioTimers {
    runtime: Handle,
    timezone: Tz,
    fires: mpsc::UnboundedSender<JobKind>,
    cancel: CancellationToken,
    jobs: HashMap<JobHandle, TimerJob>,
    next_id: u64,
    state: RunState,
}

impl TokioTimers {
    pub fn new(runtime: Handle, timezone: Tz, fires: mpsc::UnboundedSender<JobKind>) -> Self {
        Self {
            runtime,
            timezone,
            fires,
            cancel: CancellationToken::new(),
            jobs: HashMap::new(),
            next_id: 1,
            state: RunState::Idle,
        }
    }

    fn spawn(&self, kind: JobKind, trigger: Trigger) -> CancellationToken {
        let token = self.cancel.child_token();
        let job_cancel = token.clone();
        let fires = self.fires.clone();
        let tz = self.timezone;
        self.runtime.spawn(async move {
            match trigger {
                Trigger::Every(period) => run_every(kind, period, fires, job_cancel).await,
                Trigger::Daily(at) => run_daily(kind, at, tz, fires, job_cancel).await,
            }
        });
        token
    }
}

impl TimerService for TokioTimers {
    fn register(&mut self, kind: JobKind, trigger: Trigger) -> JobHandle {
        let handle = JobHandle(self.next_id);
        self.next_id += 1;
        let cancel = match self.state {
            RunState::Running => Some(self.spawn(kind, trigger)),
            RunState::Idle | RunState::Stopped => None,
        };
        self.jobs.insert(
            handle,
            TimerJob {
                kind,
                trigger,
                cancel,
            },
        );
        handle
    }

    fn unregister(&mut self, handle: JobHandle) {
        if let Some(job) = self.jobs.remove(&handle) {
            if let Some(cancel) = job.cancel {
                cancel.cancel();
            }
        }
    }

    fn start(&mut self) {
        if self.state != RunState::Idle {
            return;
        }
        self.state = RunState::Running;
        let pending: Vec<(JobHandle, JobKind, Trigger)> = self
            .jobs
            .iter()
            .map(|(handle, job)| (*handle, job.kind, job.trigger))
            .collect();
        for (handle, kind, trigger) in pending {
            let token = self.spawn(kind, trigger);
            if let Some(job) = self.jobs.get_mut(&handle) {
                job.cancel = Some(token);
            }
        }
    }

    fn shutdown(&mut self) {
        self.state = RunState::Stopped;
        self.cancel.cancel();
        self.jobs.clear();
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_every(
    kind: JobKind,
    period: Duration,
    fires: mpsc::UnboundedSender<JobKind>,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                trace!(?kind, "interval job fired");
                if fires.send(kind).is_err() {
                    warn!(?kind, "job receiver closed; stopping timer");
                    break;
                }
            }
        }
    }
}

async fn run_daily(
    kind: JobKind,
    at: NaiveTime,
    tz: Tz,
    fires: mpsc::UnboundedSender<JobKind>,
    cancel: CancellationToken,
) {
    let mut after = Utc::now().with_timezone(&tz);
    loop {
        let next = next_daily_fire(tz, at, after);
        let wait = next
            .with_timezone(&Utc)
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        debug!(?kind, %next, wait_secs = wait.as_secs_f64(), "daily job waiting");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(wait) => {
                if fires.send(kind).is_err() {
                    warn!(?kind, "job receiver closed; stopping timer");
                    break;
                }
                after = next.max(Utc::now().with_timezone(&tz));
            }
        }
    }
}

/// First instant strictly after `after` whose local time in `tz` is `at`.
///
/// Times that fall into a DST gap roll forward to the first valid minute;
/// repeated times resolve to the earlier instant.
pub fn next_daily_fire(tz: Tz, at: NaiveTime, after: DateTime<Tz>) -> DateTime<Tz> {
    after
        .date_naive()
        .iter_days()
        .take(3)
        .filter_map(|date| resolve_local(tz, date, at))
        .find(|candidate| *candidate > after)
        .unwrap_or_else(|| after + TimeDelta::days(1))
}

fn resolve_local(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    let mut candidate = NaiveDateTime::new(date, time);
    for _ in 0..=180 {
        if let Some(resolved) = tz.from_local_datetime(&candidate).earliest() {
            return Some(resolved);
        }
        candidate += TimeDelta::minutes(1);
    }
    None
}
