use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use frame_settings::FrameSettings;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::Error;

pub const DEFAULT_SETTINGS_FILE: &str = "/var/lib/pi-picture-frame/settings.yaml";

/// Holds the current settings snapshot and its YAML file.
///
/// Snapshots are immutable; `update` persists the replacement, swaps it in
/// and only then notifies subscribers. Writers are serialized so the file
/// and the live snapshot never disagree.
pub struct SettingsStore {
    path: PathBuf,
    current: watch::Sender<Arc<FrameSettings>>,
    writer: Mutex<()>,
}

impl SettingsStore {
    /// Loads `path`, using defaults when the file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let settings = FrameSettings::load(&path).map_err(Error::Settings)?;
        info!(path = %path.display(), "settings loaded");
        debug!(?settings, "active settings");
        let (current, _) = watch::channel(Arc::new(settings));
        Ok(Self {
            path,
            current,
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Arc<FrameSettings> {
        Arc::clone(&self.current.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<FrameSettings>> {
        self.current.subscribe()
    }

    pub fn save(&self) -> Result<(), Error> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.current().save(&self.path).map_err(Error::Settings)?;
        info!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    /// Clamps, persists and publishes `settings`. Nothing changes if the
    /// write fails.
    pub fn update(&self, settings: FrameSettings) -> Result<Arc<FrameSettings>, Error> {
        let settings = Arc::new(settings.normalized());
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        settings.save(&self.path).map_err(Error::Settings)?;
        self.current.send_replace(Arc::clone(&settings));
        info!(path = %self.path.display(), "settings updated");
        Ok(settings)
    }
}
