use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MOUNTS_FILE: &str = "/proc/mounts";
pub const DEFAULT_EXIT_DELAY: Duration = Duration::from_secs(5);
const BYTES_PER_GB: f64 = 1_000_000_000.0;

/// Space on one mounted file system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveSpace {
    pub name: String,
    pub free_bytes: u64,
    pub total_bytes: u64,
}

impl DriveSpace {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    pub fn free_gb(&self) -> f64 {
        self.free_bytes as f64 / BYTES_PER_GB
    }

    pub fn used_gb(&self) -> f64 {
        self.used_bytes() as f64 / BYTES_PER_GB
    }

    pub fn total_gb(&self) -> f64 {
        self.total_bytes as f64 / BYTES_PER_GB
    }
}

/// Host-level operations: disk usage and exiting the daemon.
#[derive(Debug, Clone)]
pub struct SystemController {
    shutdown: CancellationToken,
    exit_delay: Duration,
    mounts_file: PathBuf,
}

impl SystemController {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            exit_delay: DEFAULT_EXIT_DELAY,
            mounts_file: PathBuf::from(MOUNTS_FILE),
        }
    }

    pub fn with_exit_delay(mut self, delay: Duration) -> Self {
        self.exit_delay = delay;
        self
    }

    pub fn with_mounts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_file = path.into();
        self
    }

    /// Mounted file systems with a non-zero size.
    pub fn drive_info(&self) -> Vec<DriveSpace> {
        let contents = match fs::read_to_string(&self.mounts_file) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %self.mounts_file.display(), error = %err, "failed to list mounted file systems");
                return Vec::new();
            }
        };

        let mut seen = BTreeSet::new();
        let mut drives = Vec::new();
        for mount_point in parse_mount_points(&contents) {
            if !seen.insert(mount_point.clone()) {
                continue;
            }
            match space_on(&mount_point) {
                Some(drive) if drive.total_bytes > 0 => drives.push(drive),
                Some(_) => {}
                None => debug!(mount = %mount_point, "skipping unreadable mount"),
            }
        }
        drives
    }

    /// Cancels the daemon's shutdown token after the exit delay so a
    /// response can still reach the caller.
    pub fn request_exit(&self) {
        info!(delay_ms = self.exit_delay.as_millis() as u64, "exit requested");
        let shutdown = self.shutdown.clone();
        let delay = self.exit_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    info!("exiting");
                    shutdown.cancel();
                }
            }
        });
    }
}

fn parse_mount_points(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(unescape_mount_field)
        .collect()
}

/// Undoes the octal escapes (`\040` etc.) the kernel uses in mount tables.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                out.push(value as u8);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn space_on(mount_point: &str) -> Option<DriveSpace> {
    let stats = nix::sys::statvfs::statvfs(Path::new(mount_point)).ok()?;
    let fragment = stats.fragment_size() as u64;
    Some(DriveSpace {
        name: mount_point.to_string(),
        free_bytes: (stats.blocks_available() as u64).saturating_mul(fragment),
        total_bytes: (stats.blocks() as u64).saturating_mul(fragment),
    })
}
