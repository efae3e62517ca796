use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use frame_settings::MAX_BRIGHTNESS;
use serde::Serialize;
use tracing::{info, warn};

pub const DEFAULT_POWER_FILE: &str = "/sys/class/backlight/rpi_backlight/bl_power";
pub const DEFAULT_BRIGHTNESS_FILE: &str = "/sys/class/backlight/rpi_backlight/brightness";

/// Device value for the lowest visible brightness.
const DEVICE_MIN: f64 = 20.0;
/// Device value for full brightness.
const DEVICE_MAX: f64 = 255.0;

#[derive(Debug, Clone)]
pub struct BacklightPaths {
    pub power: PathBuf,
    pub brightness: PathBuf,
}

impl Default for BacklightPaths {
    fn default() -> Self {
        Self {
            power: PathBuf::from(DEFAULT_POWER_FILE),
            brightness: PathBuf::from(DEFAULT_BRIGHTNESS_FILE),
        }
    }
}

/// Cached view of the backlight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScreenState {
    pub on: bool,
    /// Percentage in `0..=100`.
    pub brightness: u8,
}

/// Outcome of a backlight write. None of these are errors for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenChange {
    Applied,
    Unchanged,
    Unsupported,
    MissingFile(PathBuf),
    Failed(String),
}

/// Percentage to raw device units.
pub fn percent_to_device(percent: u8) -> u32 {
    let percent = f64::from(percent.min(MAX_BRIGHTNESS));
    (percent / 100.0 * DEVICE_MAX).round() as u32
}

/// Raw device units to a percentage; `None` for non-positive readings.
pub fn device_to_percent(value: i64) -> Option<u8> {
    if value <= 0 {
        return None;
    }
    let normalized = (value as f64 - DEVICE_MIN) / (DEVICE_MAX - DEVICE_MIN) * 100.0;
    Some(normalized.ceil().clamp(0.0, f64::from(MAX_BRIGHTNESS)) as u8)
}

#[derive(Debug)]
struct BacklightFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl BacklightFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> io::Result<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let contents = fs::read_to_string(&self.path)?.trim().to_string();
        info!(value = %contents, path = %self.path.display(), "read backlight file");
        Ok(contents)
    }

    fn write(&self, value: &str) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        info!(value, path = %self.path.display(), "writing backlight file");
        fs::write(&self.path, value)
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Raspberry Pi touchscreen backlight driven through its sysfs files.
#[derive(Debug, Clone)]
pub struct ScreenController {
    inner: Arc<ScreenInner>,
}

#[derive(Debug)]
struct ScreenInner {
    power: BacklightFile,
    brightness: BacklightFile,
    state: Mutex<ScreenState>,
    supported: bool,
}

impl ScreenController {
    pub fn new(paths: BacklightPaths) -> Self {
        Self::with_support(paths, cfg!(target_os = "linux"))
    }

    fn with_support(paths: BacklightPaths, supported: bool) -> Self {
        Self {
            inner: Arc::new(ScreenInner {
                power: BacklightFile::new(paths.power),
                brightness: BacklightFile::new(paths.brightness),
                state: Mutex::new(ScreenState::default()),
                supported,
            }),
        }
    }

    pub fn state(&self) -> ScreenState {
        *self.inner.lock_state()
    }

    pub fn is_on(&self) -> bool {
        self.state().on
    }

    pub fn brightness(&self) -> u8 {
        self.state().brightness
    }

    /// Re-reads both backlight files into the cache.
    pub fn refresh(&self) {
        if !self.inner.supported {
            warn!("backlight control is only available on Linux; skipping refresh");
            return;
        }
        self.inner.refresh_power();
        self.inner.refresh_brightness();
    }

    pub fn set_on(&self, on: bool) -> ScreenChange {
        let inner = &self.inner;
        if inner.lock_state().on == on {
            return ScreenChange::Unchanged;
        }
        if let Some(skipped) = inner.check_writable(&inner.power, "turn the screen on or off") {
            return skipped;
        }

        match inner.power.write(if on { "0" } else { "1" }) {
            Ok(()) => {
                inner.lock_state().on = on;
                ScreenChange::Applied
            }
            Err(err) => {
                warn!(path = %inner.power.path().display(), error = %err, "failed to switch backlight power");
                ScreenChange::Failed(err.to_string())
            }
        }
    }

    pub fn set_brightness(&self, percent: u8) -> ScreenChange {
        let inner = &self.inner;
        let percent = percent.min(MAX_BRIGHTNESS);
        if inner.lock_state().brightness == percent {
            return ScreenChange::Unchanged;
        }
        if let Some(skipped) = inner.check_writable(&inner.brightness, "set brightness") {
            return skipped;
        }

        let device = percent_to_device(percent);
        match inner.brightness.write(&device.to_string()) {
            Ok(()) => {
                inner.lock_state().brightness = percent;
                ScreenChange::Applied
            }
            Err(err) => {
                warn!(path = %inner.brightness.path().display(), error = %err, "failed to set backlight brightness");
                ScreenChange::Failed(err.to_string())
            }
        }
    }
}

impl ScreenInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ScreenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self, file: &BacklightFile, action: &str) -> Option<ScreenChange> {
        if !self.supported {
            warn!("backlight control is only available on Linux; can not {action}");
            return Some(ScreenChange::Unsupported);
        }
        if !file.exists() {
            warn!(path = %file.path().display(), "backlight file does not exist; can not {action}");
            return Some(ScreenChange::MissingFile(file.path().to_path_buf()));
        }
        None
    }

    fn refresh_power(&self) {
        if !self.power.exists() {
            warn!(path = %self.power.path().display(), "missing backlight power file; can not refresh");
            return;
        }
        match self.power.read() {
            Ok(value) if !value.is_empty() => {
                self.lock_state().on = value.starts_with('0');
            }
            Ok(_) => {}
            Err(err) => {
                warn!(path = %self.power.path().display(), error = %err, "failed to read backlight power")
            }
        }
    }

    fn refresh_brightness(&self) {
        if !self.brightness.exists() {
            warn!(path = %self.brightness.path().display(), "missing backlight brightness file; can not refresh");
            return;
        }
        match self.brightness.read() {
            Ok(value) => {
                if let Some(percent) = value.parse::<i64>().ok().and_then(device_to_percent) {
                    self.lock_state().brightness = percent;
                }
            }
            Err(err) => {
                warn!(path = %self.brightness.path().display(), error = %err, "failed to read backlight brightness")
            }
        }
    }
}
