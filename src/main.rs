use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pi_picture_frame::logging::{self, LogBuffer};
use pi_picture_frame::platform::BacklightPaths;
use pi_picture_frame::platform::backlight::{DEFAULT_BRIGHTNESS_FILE, DEFAULT_POWER_FILE};
use pi_picture_frame::renderer::{DEFAULT_SHUTDOWN_TIMEOUT, PQIV_EXE_ENV, resolve_viewer_exe};
use pi_picture_frame::resources::Resources;
use pi_picture_frame::settings::DEFAULT_SETTINGS_FILE;
use pi_picture_frame::web::{self, WebState};
use pi_picture_frame::{FrameOptions, PictureFrame};

#[derive(Debug, Parser)]
#[command(
    name = "pi-picture-frame",
    version,
    about = "Raspberry Pi picture frame daemon"
)]
struct Args {
    /// Folder shown by the slideshow; defaults to the photo directory in the settings
    #[arg(long, value_name = "DIR")]
    picture_directory: Option<PathBuf>,
    /// YAML file holding the user settings
    #[arg(long, value_name = "FILE", default_value = DEFAULT_SETTINGS_FILE)]
    settings_file: PathBuf,
    /// Backlight power control file
    #[arg(long, value_name = "FILE", default_value = DEFAULT_POWER_FILE)]
    rpi_backlight_power_file: PathBuf,
    /// Backlight brightness control file
    #[arg(long, value_name = "FILE", default_value = DEFAULT_BRIGHTNESS_FILE)]
    rpi_backlight_brightness_file: PathBuf,
    /// pqiv executable
    #[arg(long, value_name = "EXE", env = PQIV_EXE_ENV)]
    pqiv_exe: Option<PathBuf>,
    /// Address of the web UI
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,
    /// IANA time zone for awake and sleep times
    #[arg(long, value_name = "TZ")]
    timezone: Option<String>,
    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Print the license and exit
    #[arg(long)]
    print_license: bool,
    /// Print the readme and exit
    #[arg(long)]
    print_readme: bool,
    /// Print the credits and exit
    #[arg(long)]
    print_credits: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let resources = Resources::bundled();

    if args.print_license || args.print_readme || args.print_credits {
        for (wanted, text) in [
            (args.print_license, &resources.license),
            (args.print_readme, &resources.readme),
            (args.print_credits, &resources.credits),
        ] {
            if wanted {
                println!("{text}");
            }
        }
        return Ok(());
    }

    let logs = LogBuffer::default();
    logging::init(args.verbose, logs.clone());

    let timezone = resolve_timezone(args.timezone.as_deref())?;
    let options = FrameOptions {
        settings_file: args.settings_file,
        picture_directory: args.picture_directory,
        backlight: BacklightPaths {
            power: args.rpi_backlight_power_file,
            brightness: args.rpi_backlight_brightness_file,
        },
        viewer_exe: resolve_viewer_exe(args.pqiv_exe),
        viewer_shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        timezone,
    };
    info!(version = Resources::version(), "starting pi-picture-frame");

    let shutdown = CancellationToken::new();
    let frame = Arc::new(
        PictureFrame::start(options, shutdown.clone())
            .await
            .context("failed to start picture frame")?,
    );

    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let state = WebState {
        frame: Arc::clone(&frame),
        logs,
        resources: Arc::new(resources),
    };
    let served = web::serve(args.bind, state, shutdown.clone()).await;
    if let Err(err) = &served {
        warn!(error = %format!("{err:#}"), "web UI stopped with an error");
    }
    shutdown.cancel();

    frame.shutdown().await;
    served
}

/// `--timezone`, then `TZ`, then `/etc/timezone`, then UTC.
fn resolve_timezone(explicit: Option<&str>) -> Result<Tz> {
    if let Some(name) = explicit {
        return Tz::from_str(name.trim()).map_err(|err| anyhow!("invalid --timezone '{name}': {err}"));
    }
    let candidates = [
        std::env::var("TZ").ok(),
        std::fs::read_to_string("/etc/timezone").ok(),
    ];
    for name in candidates.into_iter().flatten() {
        let name = name.trim().trim_start_matches(':');
        match Tz::from_str(name) {
            Ok(tz) => return Ok(tz),
            Err(_) if name.is_empty() => {}
            Err(err) => warn!(name, error = %err, "ignoring unknown time zone"),
        }
    }
    Ok(chrono_tz::UTC)
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut term) = signal(SignalKind::terminate()) {
            term.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received"),
        _ = terminate => info!("terminate received"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}
