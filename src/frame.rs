use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use frame_settings::FrameSettings;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::Error;
use crate::library::PictureLibrary;
use crate::platform::{BacklightPaths, ScreenChange, ScreenController};
use crate::renderer::{DEFAULT_SHUTDOWN_TIMEOUT, PqivRenderer, ViewerExit};
use crate::schedule::{JobKind, Scheduler, TokioTimers, Trigger};
use crate::settings::SettingsStore;
use crate::system::SystemController;

/// Everything the frame needs that does not come from the user settings.
#[derive(Debug, Clone)]
pub struct FrameOptions {
    pub settings_file: PathBuf,
    /// Overrides the settings' photo directory for the slideshow.
    pub picture_directory: Option<PathBuf>,
    pub backlight: BacklightPaths,
    pub viewer_exe: PathBuf,
    pub viewer_shutdown_timeout: Duration,
    pub timezone: Tz,
}

impl FrameOptions {
    pub fn new(settings_file: impl Into<PathBuf>, viewer_exe: impl Into<PathBuf>) -> Self {
        Self {
            settings_file: settings_file.into(),
            picture_directory: None,
            backlight: BacklightPaths::default(),
            viewer_exe: viewer_exe.into(),
            viewer_shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            timezone: chrono_tz::UTC,
        }
    }
}

/// Wires settings, scheduler, screen and viewer together.
pub struct PictureFrame {
    settings: SettingsStore,
    screen: ScreenController,
    renderer: Arc<PqivRenderer>,
    scheduler: Arc<Mutex<Scheduler>>,
    system: SystemController,
    library: PictureLibrary,
    subscription: Mutex<Option<DropGuard>>,
    dispatch: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl PictureFrame {
    /// Brings the frame up in order: settings, screen, viewer, schedule,
    /// change subscription, then the timers.
    pub async fn start(options: FrameOptions, shutdown: CancellationToken) -> Result<Self> {
        let settings = SettingsStore::load(&options.settings_file)
            .with_context(|| format!("failed to load {}", options.settings_file.display()))?;
        let initial = settings.current();

        let screen = ScreenController::new(options.backlight.clone());
        screen.refresh();
        log_screen_change("brightness", screen.set_brightness(initial.brightness));

        let picture_dir = options
            .picture_directory
            .clone()
            .unwrap_or_else(|| initial.photo_directory.clone());
        let renderer = Arc::new(
            PqivRenderer::new(&options.viewer_exe)
                .with_shutdown_timeout(options.viewer_shutdown_timeout),
        );
        renderer
            .init(&picture_dir)
            .await
            .context("failed to start the slideshow viewer")?;

        let (fires_tx, fires_rx) = mpsc::unbounded_channel();
        let timers = TokioTimers::new(Handle::current(), options.timezone, fires_tx);
        let mut scheduler = Scheduler::new(timers);
        scheduler.reconcile(None, &initial);
        let scheduler = Arc::new(Mutex::new(scheduler));

        let subscription = CancellationToken::new();
        tokio::spawn(watch_settings(
            settings.subscribe(),
            initial,
            Arc::clone(&scheduler),
            screen.clone(),
            subscription.clone(),
        ));

        lock(&scheduler).start()?;
        let dispatch_stop = CancellationToken::new();
        let dispatch = tokio::spawn(dispatch_jobs(
            fires_rx,
            screen.clone(),
            Arc::clone(&renderer),
            dispatch_stop.clone(),
        ));

        info!(
            pictures = %picture_dir.display(),
            timezone = %options.timezone,
            "picture frame started"
        );
        Ok(Self {
            settings,
            screen,
            renderer,
            scheduler,
            system: SystemController::new(shutdown),
            library: PictureLibrary::new(picture_dir),
            subscription: Mutex::new(Some(subscription.drop_guard())),
            dispatch: Mutex::new(Some((dispatch_stop, dispatch))),
        })
    }

    pub fn settings(&self) -> Arc<FrameSettings> {
        self.settings.current()
    }

    /// Persists and publishes new settings; the schedule and brightness
    /// follow asynchronously.
    pub fn update_settings(&self, settings: FrameSettings) -> Result<Arc<FrameSettings>, Error> {
        self.settings.update(settings)
    }

    pub fn screen(&self) -> &ScreenController {
        &self.screen
    }

    pub fn renderer(&self) -> &PqivRenderer {
        &self.renderer
    }

    pub fn system(&self) -> &SystemController {
        &self.system
    }

    pub fn library(&self) -> &PictureLibrary {
        &self.library
    }

    pub fn scheduled_jobs(&self) -> Vec<(JobKind, Trigger)> {
        lock(&self.scheduler).live_jobs()
    }

    pub async fn next_picture(&self) -> Result<(), Error> {
        self.renderer.go_to_next_picture().await
    }

    /// Flips the backlight and returns the new state.
    pub fn toggle_screen(&self) -> bool {
        let target = !self.screen.is_on();
        log_screen_change("power", self.screen.set_on(target));
        self.screen.is_on()
    }

    /// Tears down in reverse start order. Each step runs even when an
    /// earlier one failed.
    pub async fn shutdown(&self) {
        info!("shutting down picture frame");

        if take(&self.subscription).is_some() {
            debug!("settings subscription dropped");
        }

        lock(&self.scheduler).stop();
        if let Some((stop, dispatch)) = take(&self.dispatch) {
            stop.cancel();
            if let Err(err) = dispatch.await {
                warn!(error = %err, "job dispatcher ended abnormally");
            }
        }

        debug!("system controller released");

        match self.renderer.shutdown().await {
            Ok(ViewerExit::Exited(status)) => info!(%status, "viewer stopped"),
            Ok(ViewerExit::Killed) => warn!("viewer had to be killed"),
            Ok(ViewerExit::NotRunning) => debug!("viewer was not running"),
            Err(err) => warn!(error = %err, "failed to stop viewer"),
        }

        debug!("screen controller released");

        if let Err(err) = self.settings.save() {
            warn!(error = %err, "failed to save settings on shutdown");
        }
        info!("picture frame stopped");
    }
}

async fn watch_settings(
    mut updates: watch::Receiver<Arc<FrameSettings>>,
    mut previous: Arc<FrameSettings>,
    scheduler: Arc<Mutex<Scheduler>>,
    screen: ScreenController,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = Arc::clone(&updates.borrow_and_update());
                let summary = lock(&scheduler).reconcile(Some(&previous), &next);
                debug!(?summary, "applied schedule from new settings");
                log_screen_change("brightness", screen.set_brightness(next.brightness));
                previous = next;
            }
        }
    }
    debug!("settings watcher stopped");
}

/// Runs fired jobs until `stop` is cancelled, then closes the channel and
/// still runs whatever had already fired.
async fn dispatch_jobs(
    mut fires: mpsc::UnboundedReceiver<JobKind>,
    screen: ScreenController,
    renderer: Arc<PqivRenderer>,
    stop: CancellationToken,
) {
    let mut closed = false;
    loop {
        let fired = tokio::select! {
            biased;
            _ = stop.cancelled(), if !closed => {
                fires.close();
                closed = true;
                continue;
            }
            fired = fires.recv() => fired,
        };
        let Some(kind) = fired else { break };
        info!(?kind, "running scheduled job");
        match kind {
            JobKind::ScreenOn | JobKind::ScreenOff => {
                let screen = screen.clone();
                let on = kind == JobKind::ScreenOn;
                tokio::task::spawn_blocking(move || log_screen_change("power", screen.set_on(on)));
            }
            JobKind::NextPicture => {
                let renderer = Arc::clone(&renderer);
                tokio::spawn(async move {
                    if let Err(err) = renderer.go_to_next_picture().await {
                        warn!(error = %err, "scheduled picture change failed");
                    }
                });
            }
        }
    }
    debug!("job dispatcher stopped");
}

fn log_screen_change(what: &str, change: ScreenChange) {
    match change {
        ScreenChange::Applied => debug!(what, "screen updated"),
        ScreenChange::Unchanged => debug!(what, "screen already in requested state"),
        ScreenChange::Unsupported | ScreenChange::MissingFile(_) => {
            debug!(what, ?change, "screen change skipped")
        }
        ScreenChange::Failed(reason) => warn!(what, %reason, "screen change failed"),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    lock(slot).take()
}
