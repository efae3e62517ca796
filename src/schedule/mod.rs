mod timers;

use frame_settings::FrameSettings;
use tracing::{debug, info};

use crate::Error;

pub use timers::{JobHandle, TimerService, TokioTimers, Trigger, next_daily_fire};

/// The three actions the frame schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    ScreenOn,
    ScreenOff,
    NextPicture,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::ScreenOn, JobKind::ScreenOff, JobKind::NextPicture];

    /// Trigger the settings ask for, or `None` when the job is disabled.
    pub fn trigger(self, settings: &FrameSettings) -> Option<Trigger> {
        match self {
            JobKind::ScreenOn => settings.awake_time.map(Trigger::Daily),
            JobKind::ScreenOff => settings.sleep_time.map(Trigger::Daily),
            JobKind::NextPicture => settings.photo_change_period().map(Trigger::Every),
        }
    }

    fn slot(self) -> usize {
        match self {
            JobKind::ScreenOn => 0,
            JobKind::ScreenOff => 1,
            JobKind::NextPicture => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveJob {
    handle: JobHandle,
    trigger: Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Counts of timer calls made by one [`Scheduler::reconcile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub registered: usize,
    pub unregistered: usize,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        self.registered == 0 && self.unregistered == 0
    }
}

/// Keeps at most one live job per [`JobKind`] in line with the settings.
pub struct Scheduler<T: TimerService = TokioTimers> {
    timers: T,
    slots: [Option<LiveJob>; 3],
    state: SchedulerState,
}

impl<T: TimerService> Scheduler<T> {
    pub fn new(timers: T) -> Self {
        Self {
            timers,
            slots: [None; 3],
            state: SchedulerState::Idle,
        }
    }

    /// Brings the live jobs from `previous` to `next`.
    ///
    /// Each kind is compared on its own. A slot whose trigger did not change
    /// is left alone; otherwise the old job goes and a new one is registered
    /// if the new trigger is enabled. `previous == None` treats every enabled
    /// trigger as changed.
    pub fn reconcile(
        &mut self,
        previous: Option<&FrameSettings>,
        next: &FrameSettings,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        for kind in JobKind::ALL {
            let desired = kind.trigger(next);
            if let Some(previous) = previous {
                if kind.trigger(previous) == desired {
                    continue;
                }
            }

            let slot = &mut self.slots[kind.slot()];
            if let Some(live) = slot.take() {
                info!(?kind, trigger = %live.trigger, "removing scheduled job");
                self.timers.unregister(live.handle);
                summary.unregistered += 1;
            }
            if let Some(trigger) = desired {
                let handle = self.timers.register(kind, trigger);
                info!(?kind, %trigger, handle = handle.0, "scheduled job");
                *slot = Some(LiveJob { handle, trigger });
                summary.registered += 1;
            }
        }
        debug!(
            registered = summary.registered,
            unregistered = summary.unregistered,
            "schedule reconciled"
        );
        summary
    }

    pub fn start(&mut self) -> Result<(), Error> {
        match self.state {
            SchedulerState::Idle => {
                self.timers.start();
                self.state = SchedulerState::Running;
                info!(jobs = self.live_jobs().len(), "scheduler started");
                Ok(())
            }
            SchedulerState::Running => Err(Error::SchedulerAlreadyStarted),
            SchedulerState::Stopped => Err(Error::SchedulerStopped),
        }
    }

    /// Stops every timer. Fires already delivered are not recalled.
    pub fn stop(&mut self) {
        if self.state == SchedulerState::Stopped {
            return;
        }
        self.timers.shutdown();
        self.state = SchedulerState::Stopped;
        info!("scheduler stopped");
    }

    pub fn live_jobs(&self) -> Vec<(JobKind, Trigger)> {
        JobKind::ALL
            .into_iter()
            .filter_map(|kind| self.slots[kind.slot()].map(|live| (kind, live.trigger)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeDelta};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Register(JobKind, Trigger),
        Unregister(JobHandle),
        Start,
        Shutdown,
    }

    #[derive(Default)]
    struct Recording {
        calls: Vec<Call>,
        next: u64,
    }

    impl Recording {
        fn take(&mut self) -> Vec<Call> {
            std::mem::take(&mut self.calls)
        }
    }

    impl TimerService for Recording {
        fn register(&mut self, kind: JobKind, trigger: Trigger) -> JobHandle {
            self.next += 1;
            self.calls.push(Call::Register(kind, trigger));
            JobHandle(self.next)
        }

        fn unregister(&mut self, handle: JobHandle) {
            self.calls.push(Call::Unregister(handle));
        }

        fn start(&mut self) {
            self.calls.push(Call::Start);
        }

        fn shutdown(&mut self) {
            self.calls.push(Call::Shutdown);
        }
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn settings() -> FrameSettings {
        FrameSettings {
            awake_time: Some(hm(8, 0)),
            sleep_time: Some(hm(22, 0)),
            photo_change_interval: TimeDelta::seconds(30),
            ..FrameSettings::default()
        }
    }

    #[test]
    fn first_reconcile_registers_enabled_jobs() {
        let mut scheduler = Scheduler::new(Recording::default());
        let config = FrameSettings {
            sleep_time: None,
            ..settings()
        };
        let summary = scheduler.reconcile(None, &config);

        assert_eq!(summary.registered, 2);
        assert_eq!(
            scheduler.timers.take(),
            vec![
                Call::Register(JobKind::ScreenOn, Trigger::Daily(hm(8, 0))),
                Call::Register(JobKind::NextPicture, Trigger::Every(Duration::from_secs(30))),
            ]
        );
    }

    #[test]
    fn identical_settings_cause_no_churn() {
        let mut scheduler = Scheduler::new(Recording::default());
        let config = settings();
        scheduler.reconcile(None, &config);
        scheduler.timers.take();

        let summary = scheduler.reconcile(Some(&config), &config);
        assert!(summary.is_noop());
        assert!(scheduler.timers.take().is_empty());
    }

    #[test]
    fn changing_interval_leaves_screen_jobs_alone() {
        let mut scheduler = Scheduler::new(Recording::default());
        let old = settings();
        scheduler.reconcile(None, &old);
        scheduler.timers.take();

        let new = FrameSettings {
            photo_change_interval: TimeDelta::minutes(2),
            ..old.clone()
        };
        scheduler.reconcile(Some(&old), &new);
        assert_eq!(
            scheduler.timers.take(),
            vec![
                Call::Unregister(JobHandle(3)),
                Call::Register(JobKind::NextPicture, Trigger::Every(Duration::from_secs(120))),
            ]
        );
    }

    #[test]
    fn disabling_awake_time_only_unregisters() {
        let mut scheduler = Scheduler::new(Recording::default());
        let old = settings();
        scheduler.reconcile(None, &old);
        scheduler.timers.take();

        let new = FrameSettings {
            awake_time: None,
            ..old.clone()
        };
        let summary = scheduler.reconcile(Some(&old), &new);
        assert_eq!(summary, ReconcileSummary { registered: 0, unregistered: 1 });
        assert_eq!(scheduler.timers.take(), vec![Call::Unregister(JobHandle(1))]);
        assert!(
            scheduler
                .live_jobs()
                .iter()
                .all(|(kind, _)| *kind != JobKind::ScreenOn)
        );
    }

    #[test]
    fn both_disabled_counts_as_unchanged() {
        let mut scheduler = Scheduler::new(Recording::default());
        let old = FrameSettings {
            photo_change_interval: TimeDelta::seconds(-5),
            ..settings()
        };
        let new = FrameSettings {
            photo_change_interval: TimeDelta::zero(),
            ..settings()
        };
        scheduler.reconcile(None, &old);
        scheduler.timers.take();

        assert!(scheduler.reconcile(Some(&old), &new).is_noop());
    }

    #[test]
    fn start_twice_is_an_error() {
        let mut scheduler = Scheduler::new(Recording::default());
        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(Error::SchedulerAlreadyStarted)));

        scheduler.stop();
        assert!(matches!(scheduler.start(), Err(Error::SchedulerStopped)));
        assert_eq!(scheduler.timers.take(), vec![Call::Start, Call::Shutdown]);
    }
}
