#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use frame_settings::FrameSettings;
use pi_picture_frame::platform::BacklightPaths;
use pi_picture_frame::renderer::RendererState;
use pi_picture_frame::schedule::{JobKind, Trigger};
use pi_picture_frame::{FrameOptions, PictureFrame};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

static SERIAL: Mutex<()> = Mutex::const_new(());

const VIEWER: &str = r#"#!/bin/sh
if [ "$1" = "--help" ]; then exit 0; fi
n=0
while IFS= read -r line; do
  case "$line" in
    "set_status_output(1)") echo 'CURRENT_FILE_NAME="/pics/0.jpg"' ;;
    "goto_file_relative(1)")
      n=$((n + 1))
      echo "CURRENT_FILE_INDEX=$n"
      echo "CURRENT_FILE_NAME=\"/pics/$n.jpg\""
      ;;
    "quit()") exit 0 ;;
  esac
done
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    options: FrameOptions,
}

fn fixture(settings: &FrameSettings) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    let exe = root.join("pqiv");
    fs::write(&exe, VIEWER).unwrap();
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();

    let backlight = BacklightPaths {
        power: root.join("bl_power"),
        brightness: root.join("brightness"),
    };
    fs::write(&backlight.power, "1\n").unwrap();
    fs::write(&backlight.brightness, "255\n").unwrap();

    let settings_file = root.join("state/settings.yaml");
    settings.save(&settings_file).unwrap();

    let mut options = FrameOptions::new(settings_file, exe);
    options.backlight = backlight;
    options.picture_directory = Some(root.join("pictures"));
    options.viewer_shutdown_timeout = Duration::from_secs(2);
    Fixture { _dir: dir, options }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap().trim().to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn settings_changes_drive_the_schedule_and_screen() {
    let _serial = SERIAL.lock().await;
    let initial = FrameSettings {
        brightness: 75,
        photo_change_interval: TimeDelta::zero(),
        ..FrameSettings::default()
    };
    let fx = fixture(&initial);
    let frame = PictureFrame::start(fx.options.clone(), CancellationToken::new())
        .await
        .unwrap();

    if cfg!(target_os = "linux") {
        assert_eq!(read(&fx.options.backlight.brightness), "191");
    }
    assert_eq!(frame.renderer().state().await, RendererState::Running);
    assert!(frame.scheduled_jobs().is_empty());
    eventually("first picture", || {
        frame.renderer().current_picture() == Some(PathBuf::from("/pics/0.jpg"))
    })
    .await;

    let faster = FrameSettings {
        brightness: 100,
        photo_change_interval: TimeDelta::milliseconds(100),
        ..(*frame.settings()).clone()
    };
    frame.update_settings(faster).unwrap();

    eventually("next-picture job", || {
        frame
            .scheduled_jobs()
            .iter()
            .any(|(kind, _)| *kind == JobKind::NextPicture)
    })
    .await;
    eventually("slideshow to advance", || {
        frame
            .renderer()
            .current_picture()
            .is_some_and(|path| path != Path::new("/pics/0.jpg"))
    })
    .await;
    if cfg!(target_os = "linux") {
        eventually("brightness write", || {
            read(&fx.options.backlight.brightness) == "255"
        })
        .await;
    }

    frame.shutdown().await;
    assert_eq!(frame.renderer().state().await, RendererState::Stopped);
    let saved = FrameSettings::load(&fx.options.settings_file).unwrap();
    assert_eq!(saved.photo_change_interval, TimeDelta::milliseconds(100));
    assert_eq!(saved.brightness, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn schedule_follows_settings_when_brightness_cannot_be_written() {
    let _serial = SERIAL.lock().await;
    let initial = FrameSettings {
        photo_change_interval: TimeDelta::zero(),
        ..FrameSettings::default()
    };
    let fx = fixture(&initial);
    let frame = PictureFrame::start(fx.options.clone(), CancellationToken::new())
        .await
        .unwrap();
    assert!(frame.scheduled_jobs().is_empty());

    fs::remove_file(&fx.options.backlight.brightness).unwrap();
    let changed = FrameSettings {
        brightness: 20,
        photo_change_interval: TimeDelta::minutes(5),
        ..(*frame.settings()).clone()
    };
    frame.update_settings(changed).unwrap();

    eventually("next-picture job despite missing brightness file", || {
        frame
            .scheduled_jobs()
            .contains(&(JobKind::NextPicture, Trigger::Every(Duration::from_secs(300))))
    })
    .await;
    assert!(!fx.options.backlight.brightness.exists());

    frame.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn toggling_the_screen_writes_the_power_file() {
    if !cfg!(target_os = "linux") {
        return;
    }
    let _serial = SERIAL.lock().await;
    let fx = fixture(&FrameSettings::default());
    let frame = PictureFrame::start(fx.options.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert!(!frame.screen().is_on());
    assert!(frame.toggle_screen());
    assert_eq!(read(&fx.options.backlight.power), "0");
    assert!(!frame.toggle_screen());
    assert_eq!(read(&fx.options.backlight.power), "1");

    frame.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unusable_viewer_aborts_startup() {
    let _serial = SERIAL.lock().await;
    let mut fx = fixture(&FrameSettings::default());
    fx.options.viewer_exe = PathBuf::from("/nonexistent/pqiv");

    let err = match PictureFrame::start(fx.options.clone(), CancellationToken::new()).await {
        Ok(_) => panic!("startup should fail"),
        Err(err) => err,
    };
    assert!(
        format!("{err:#}").contains("failed to start the slideshow viewer"),
        "{err:#}"
    );
}
