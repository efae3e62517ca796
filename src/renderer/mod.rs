mod status;

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Error;

pub use status::{ViewerLine, classify_line};

pub const DEFAULT_PQIV_EXE: &str = "/usr/bin/pqiv";
pub const PQIV_EXE_ENV: &str = "PQIV_EXE_PATH";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const PROBE_ARG: &str = "--help";
const VIEWER_ARGS: [&str; 9] = [
    "--disable-backends=libav",
    "--fullscreen",
    "--hide-info-box",
    "--fade",
    "--scale-images-up",
    "--end-of-files-action=wrap",
    "--shuffle",
    "--watch-directories",
    "--actions-from-stdin",
];

const CMD_STATUS_OUTPUT: &str = "set_status_output(1)";
const CMD_NEXT: &str = "goto_file_relative(1)";
const CMD_QUIT: &str = "quit()";

/// Explicit path, then `PQIV_EXE_PATH`, then the system default.
pub fn resolve_viewer_exe(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| {
            std::env::var_os(PQIV_EXE_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PQIV_EXE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    NotStarted,
    Running,
    Stopped,
}

/// How the viewer went away during [`PqivRenderer::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerExit {
    NotRunning,
    Exited(ExitStatus),
    Killed,
}

struct ViewerProcess {
    child: Child,
    stdin: ChildStdin,
    readers: Vec<JoinHandle<()>>,
}

struct Supervised {
    state: RendererState,
    process: Option<ViewerProcess>,
}

/// Owns the `pqiv` slideshow process.
pub struct PqivRenderer {
    exe: PathBuf,
    shutdown_timeout: Duration,
    supported: bool,
    supervised: AsyncMutex<Supervised>,
    current: Arc<Mutex<Option<PathBuf>>>,
}

impl PqivRenderer {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            supported: cfg!(unix),
            supervised: AsyncMutex::new(Supervised {
                state: RendererState::NotStarted,
                process: None,
            }),
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub async fn state(&self) -> RendererState {
        self.supervised.lock().await.state
    }

    /// Last file the viewer reported as shown.
    pub fn current_picture(&self) -> Option<PathBuf> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Probes the executable, launches the slideshow over `picture_dir`
    /// and turns on status output.
    pub async fn init(&self, picture_dir: &Path) -> Result<(), Error> {
        if !self.supported {
            warn!("pqiv is only supported on Unix; slideshow disabled");
            return Ok(());
        }

        let mut supervised = self.supervised.lock().await;
        if supervised.state != RendererState::NotStarted {
            warn!(state = ?supervised.state, "viewer already initialised; ignoring init");
            return Ok(());
        }

        self.probe().await?;

        let mut command = Command::new(&self.exe);
        command
            .args(VIEWER_ARGS)
            .arg(picture_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|source| Error::ViewerSpawn {
            exe: self.exe.clone(),
            source,
        })?;
        info!(pid = child.id(), exe = %self.exe.display(), dir = %picture_dir.display(), "viewer started");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let current = Arc::clone(&self.current);
            readers.push(tokio::spawn(drain(stdout, move |line| {
                handle_stdout_line(&line, &current)
            })));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(drain(stderr, |line| {
                warn!(line = %line, "viewer stderr")
            })));
        }
        let Some(stdin) = child.stdin.take() else {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(Error::ViewerSpawn {
                exe: self.exe.clone(),
                source: std::io::Error::other("viewer stdin was not captured"),
            });
        };

        let mut process = ViewerProcess {
            child,
            stdin,
            readers,
        };
        send(&mut process.stdin, CMD_STATUS_OUTPUT).await?;

        supervised.process = Some(process);
        supervised.state = RendererState::Running;
        Ok(())
    }

    /// Asks the viewer to advance; the new picture arrives via status output.
    pub async fn go_to_next_picture(&self) -> Result<(), Error> {
        if !self.supported {
            warn!("pqiv is only supported on Unix; can not change picture");
            return Ok(());
        }
        let mut supervised = self.supervised.lock().await;
        let process = supervised.process.as_mut().ok_or(Error::ViewerNotRunning)?;
        debug!("advancing slideshow");
        send(&mut process.stdin, CMD_NEXT).await
    }

    /// Sends `quit()`, waits up to the shutdown timeout, then kills.
    pub async fn shutdown(&self) -> Result<ViewerExit, Error> {
        let mut supervised = self.supervised.lock().await;
        let Some(process) = supervised.process.take() else {
            supervised.state = RendererState::Stopped;
            return Ok(ViewerExit::NotRunning);
        };
        let ViewerProcess {
            mut child,
            mut stdin,
            readers,
        } = process;

        if let Err(err) = send(&mut stdin, CMD_QUIT).await {
            warn!(error = %err, "failed to ask viewer to quit");
        }
        drop(stdin);

        let exit = match tokio::time::timeout(self.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!(%status, "viewer exited");
                ViewerExit::Exited(status)
            }
            Ok(Err(err)) => {
                warn!(error = %err, "failed waiting for viewer; killing");
                kill(&mut child).await;
                ViewerExit::Killed
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "viewer ignored quit; killing"
                );
                kill(&mut child).await;
                ViewerExit::Killed
            }
        };

        for reader in readers {
            reader.abort();
        }
        supervised.state = RendererState::Stopped;
        Ok(exit)
    }
}

async fn kill(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        warn!(error = %err, "failed to kill viewer");
    }
    if let Err(err) = child.wait().await {
        warn!(error = %err, "failed to reap viewer");
    }
}

async fn send(stdin: &mut ChildStdin, command: &'static str) -> Result<(), Error> {
    let io = |source| Error::ViewerIo { command, source };
    stdin
        .write_all(format!("{command}\n").as_bytes())
        .await
        .map_err(io)?;
    stdin.flush().await.map_err(io)
}

async fn drain<R, F>(stream: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => on_line(line),
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "failed reading viewer output");
                break;
            }
        }
    }
}

fn handle_stdout_line(line: &str, current: &Mutex<Option<PathBuf>>) {
    match classify_line(line) {
        ViewerLine::CurrentFile(path) => {
            debug!(path = %path.display(), "viewer showing file");
            *current.lock().unwrap_or_else(PoisonError::into_inner) = Some(path);
        }
        ViewerLine::FileIndex(index) => debug!(index, "viewer file index"),
        ViewerLine::Other => warn!(line = %line, "unexpected viewer output"),
    }
}

impl PqivRenderer {
    async fn probe(&self) -> Result<(), Error> {
        let status = Command::new(&self.exe)
            .arg(PROBE_ARG)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|err| Error::ViewerProbe {
                exe: self.exe.clone(),
                reason: err.to_string(),
            })?;
        if !status.success() {
            return Err(Error::ViewerProbe {
                exe: self.exe.clone(),
                reason: format!("exited with {status}"),
            });
        }
        debug!(exe = %self.exe.display(), "viewer probe succeeded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdout_lines_update_current_picture_only_for_file_names() {
        let current = Mutex::new(None);
        handle_stdout_line(r#"CURRENT_FILE_NAME="/pics/a.jpg""#, &current);
        assert_eq!(*current.lock().unwrap(), Some(PathBuf::from("/pics/a.jpg")));

        handle_stdout_line("CURRENT_FILE_INDEX=3", &current);
        assert_eq!(*current.lock().unwrap(), Some(PathBuf::from("/pics/a.jpg")));

        handle_stdout_line("something else", &current);
        assert_eq!(*current.lock().unwrap(), Some(PathBuf::from("/pics/a.jpg")));
    }

    #[test]
    fn explicit_exe_wins() {
        let exe = resolve_viewer_exe(Some(PathBuf::from("/opt/pqiv")));
        assert_eq!(exe, PathBuf::from("/opt/pqiv"));
    }

    #[tokio::test]
    async fn commands_before_init_are_rejected() {
        let renderer = PqivRenderer::new("/nonexistent/pqiv");
        assert_eq!(renderer.state().await, RendererState::NotStarted);
        if cfg!(unix) {
            assert!(matches!(
                renderer.go_to_next_picture().await,
                Err(Error::ViewerNotRunning)
            ));
        }
        assert_eq!(renderer.shutdown().await.unwrap(), ViewerExit::NotRunning);
        assert_eq!(renderer.state().await, RendererState::Stopped);
    }

    #[tokio::test]
    async fn missing_executable_fails_probe() {
        if !cfg!(unix) {
            return;
        }
        let renderer = PqivRenderer::new("/nonexistent/pqiv");
        let err = renderer.init(Path::new("/tmp")).await.unwrap_err();
        assert!(matches!(err, Error::ViewerProbe { .. }), "{err}");
        assert_eq!(renderer.state().await, RendererState::NotStarted);
    }
}
