use std::fmt::Write as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, Form, Multipart, State};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use chrono::{NaiveTime, TimeDelta, Timelike};
use frame_settings::{FrameSettings, MAX_BRIGHTNESS};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::frame::PictureFrame;
use crate::logging::LogBuffer;
use crate::platform::ScreenState;
use crate::resources::Resources;
use crate::system::DriveSpace;

const UPLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct WebState {
    pub frame: Arc<PictureFrame>,
    pub logs: LogBuffer,
    pub resources: Arc<Resources>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/next-picture", post(next_picture))
        .route("/settings", get(settings_page).post(save_settings))
        .route("/system", get(system_page))
        .route("/system/screen", post(toggle_screen))
        .route("/system/exit", post(exit_process))
        .route("/system/space", get(space_page))
        .route("/system/log", get(log_page))
        .route(
            "/upload",
            get(upload_page)
                .post(upload)
                .layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/about", get(about_page))
        .route("/about/license", get(license_page))
        .route("/about/readme", get(readme_page))
        .route("/about/credits", get(credits_page))
        .route("/status.json", get(status_json))
        .with_state(state)
}

/// Serves the UI until `shutdown` is cancelled.
pub async fn serve(bind: SocketAddr, state: WebState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind web UI on {bind}"))?;
    info!(%bind, "web UI listening");

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("web UI exited")?;
    Ok(())
}

async fn home(State(state): State<WebState>) -> Html<String> {
    let picture = state
        .frame
        .renderer()
        .current_picture()
        .map(|path| escape(&path.display().to_string()))
        .unwrap_or_else(|| "Nothing reported yet".to_string());
    Html(page(
        "Picture Frame",
        &format!(
            "<section><h1>Now showing</h1><p class='mono'>{picture}</p>\
<form method='post' action='/next-picture'><button type='submit'>Next picture</button></form></section>"
        ),
    ))
}

async fn next_picture(State(state): State<WebState>) -> Html<String> {
    match state.frame.next_picture().await {
        Ok(()) => Html(message_page("Next picture", "Moving to the next picture.", "/")),
        Err(err) => {
            warn!(error = %err, "next picture request failed");
            Html(error_page(&err.to_string(), "/"))
        }
    }
}

async fn settings_page(State(state): State<WebState>) -> Html<String> {
    Html(render_settings(&state.frame.settings()))
}

async fn save_settings(
    State(state): State<WebState>,
    Form(form): Form<SettingsForm>,
) -> Html<String> {
    let current = state.frame.settings();
    let updated = match form.apply(&current) {
        Ok(updated) => updated,
        Err(message) => return Html(error_page(&message, "/settings")),
    };
    match state.frame.update_settings(updated) {
        Ok(_) => Html(message_page("Settings saved", "Your settings were saved.", "/settings")),
        Err(err) => {
            warn!(error = %err, "saving settings failed");
            Html(error_page(&err.to_string(), "/settings"))
        }
    }
}

async fn system_page(State(state): State<WebState>) -> Html<String> {
    let screen = state.frame.screen().state();
    let (label, action) = if screen.on {
        ("On", "Turn screen off")
    } else {
        ("Off", "Turn screen on")
    };
    Html(page(
        "System",
        &format!(
            "<section><h1>System</h1><p>Screen: <strong>{label}</strong>, brightness {}%</p>\
<form method='post' action='/system/screen'><button type='submit'>{action}</button></form>\
<form method='post' action='/system/exit'><button type='submit' class='danger'>Exit picture frame</button></form>\
<p><a href='/system/space'>Disk space</a> · <a href='/system/log'>Log</a></p></section>",
            screen.brightness
        ),
    ))
}

async fn toggle_screen(State(state): State<WebState>) -> Html<String> {
    let frame = Arc::clone(&state.frame);
    match tokio::task::spawn_blocking(move || frame.toggle_screen()).await {
        Ok(on) => Html(message_page(
            "Screen",
            &format!("Screen set to {}.", if on { "On" } else { "Off" }),
            "/system",
        )),
        Err(err) => Html(error_page(&err.to_string(), "/system")),
    }
}

async fn exit_process(State(state): State<WebState>) -> Html<String> {
    state.frame.system().request_exit();
    Html(message_page(
        "Exiting",
        "Shutting down. The desktop should return in a few seconds.",
        "/system",
    ))
}

async fn space_page(State(state): State<WebState>) -> Html<String> {
    let system = state.frame.system().clone();
    let drives = tokio::task::spawn_blocking(move || system.drive_info())
        .await
        .unwrap_or_default();
    Html(page("Disk space", &render_drives(&drives)))
}

async fn log_page(State(state): State<WebState>) -> Html<String> {
    let mut lines = String::new();
    for line in state.logs.lines() {
        let _ = writeln!(lines, "{}", escape(&line));
    }
    Html(page(
        "Log",
        &format!("<section><h1>Log</h1><pre>{lines}</pre></section>"),
    ))
}

async fn upload_page(State(state): State<WebState>) -> Html<String> {
    Html(render_upload(&state.frame.library().sub_directories()))
}

struct UploadedFile {
    name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

async fn upload(State(state): State<WebState>, multipart: Multipart) -> Html<String> {
    match receive_upload(&state, multipart).await {
        Ok(message) => Html(message_page("Upload", &message, "/upload")),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "upload failed");
            Html(error_page(&format!("{err:#}"), "/upload"))
        }
    }
}

async fn receive_upload(state: &WebState, mut multipart: Multipart) -> Result<String> {
    let mut directory = String::new();
    let mut new_directory = String::new();
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.context("malformed upload")? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "directory" => directory = field.text().await.context("malformed upload")?,
            "new_directory" => new_directory = field.text().await.context("malformed upload")?,
            "files" => {
                let name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.context("failed to receive file")?;
                if !name.is_empty() {
                    files.push(UploadedFile {
                        name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }

    let library = state.frame.library().clone();
    tokio::task::spawn_blocking(move || -> Result<String> {
        let target = if new_directory.trim().is_empty() {
            directory
        } else {
            library.create_sub_directory(&new_directory)?;
            new_directory.trim().to_string()
        };
        if files.is_empty() {
            return Ok(format!("Directory '{target}' is ready."));
        }
        for file in &files {
            library.upload(&target, &file.name, file.content_type.as_deref(), &file.bytes)?;
        }
        Ok(format!("Uploaded {} file(s) to '{target}'.", files.len()))
    })
    .await
    .context("upload worker failed")?
}

async fn about_page() -> Html<String> {
    Html(page(
        "About",
        &format!(
            "<section><h1>pi-picture-frame</h1><p>Version {}</p>\
<p><a href='/about/license'>License</a> · <a href='/about/readme'>Readme</a> · <a href='/about/credits'>Credits</a></p></section>",
            Resources::version()
        ),
    ))
}

async fn license_page(State(state): State<WebState>) -> Html<String> {
    Html(text_page("License", &state.resources.license))
}

async fn readme_page(State(state): State<WebState>) -> Html<String> {
    Html(text_page("Readme", &state.resources.readme))
}

async fn credits_page(State(state): State<WebState>) -> Html<String> {
    Html(text_page("Credits", &state.resources.credits))
}

#[derive(Serialize)]
struct StatusReport {
    settings: FrameSettings,
    screen: ScreenState,
    current_picture: Option<PathBuf>,
    jobs: Vec<String>,
}

async fn status_json(State(state): State<WebState>) -> Response {
    let frame = &state.frame;
    let report = StatusReport {
        settings: (*frame.settings()).clone(),
        screen: frame.screen().state(),
        current_picture: frame.renderer().current_picture(),
        jobs: frame
            .scheduled_jobs()
            .into_iter()
            .map(|(kind, trigger)| format!("{kind:?}: {trigger}"))
            .collect(),
    };
    Json(report).into_response()
}

/// Fields of the settings form. Checkboxes are only sent when ticked.
#[derive(Debug, Deserialize)]
pub struct SettingsForm {
    pub awake_hour: u32,
    pub awake_minute: u32,
    #[serde(default)]
    pub awake_disabled: Option<String>,
    pub sleep_hour: u32,
    pub sleep_minute: u32,
    #[serde(default)]
    pub sleep_disabled: Option<String>,
    pub brightness: u32,
    pub change_interval_secs: i64,
}

impl SettingsForm {
    /// Replacement settings; everything the form does not show is kept.
    pub fn apply(&self, current: &FrameSettings) -> Result<FrameSettings, String> {
        let awake_time = form_time("Awake", self.awake_hour, self.awake_minute, &self.awake_disabled)?;
        let sleep_time = form_time("Sleep", self.sleep_hour, self.sleep_minute, &self.sleep_disabled)?;
        let photo_change_interval = TimeDelta::try_seconds(self.change_interval_secs)
            .ok_or_else(|| format!("Change interval of {} seconds is too long", self.change_interval_secs))?;
        Ok(FrameSettings {
            awake_time,
            sleep_time,
            brightness: u8::try_from(self.brightness).map_or(MAX_BRIGHTNESS, |b| b.min(MAX_BRIGHTNESS)),
            photo_change_interval,
            ..current.clone()
        }
        .normalized())
    }
}

fn form_time(
    label: &str,
    hour: u32,
    minute: u32,
    disabled: &Option<String>,
) -> Result<Option<NaiveTime>, String> {
    if disabled.is_some() {
        return Ok(None);
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
        .map(Some)
        .ok_or_else(|| format!("{label} time {hour:02}:{minute:02} is not a valid time of day"))
}

fn render_settings(settings: &FrameSettings) -> String {
    let time_fields = |prefix: &str, label: &str, time: Option<NaiveTime>| {
        let (hour, minute) = time.map(|t| (t.hour(), t.minute())).unwrap_or((0, 0));
        let checked = if time.is_none() { " checked" } else { "" };
        format!(
            "<fieldset><legend>{label}</legend>\
<label>Hour<input type='number' name='{prefix}_hour' min='0' max='23' value='{hour}' required></label>\
<label>Minute<input type='number' name='{prefix}_minute' min='0' max='59' value='{minute}' required></label>\
<label class='inline'><input type='checkbox' name='{prefix}_disabled'{checked}> Never</label></fieldset>"
        )
    };
    let change_secs = settings.photo_change_interval.num_seconds();
    page(
        "Settings",
        &format!(
            "<section><h1>Settings</h1><form method='post' action='/settings'>{}{}\
<label>Brightness (0-100)<input type='number' name='brightness' min='0' max='100' value='{}' required></label>\
<label>Change picture every (seconds, 0 to stop)<input type='number' name='change_interval_secs' min='0' value='{change_secs}' required></label>\
<button type='submit'>Save</button></form></section>",
            time_fields("awake", "Screen on at", settings.awake_time),
            time_fields("sleep", "Screen off at", settings.sleep_time),
            settings.brightness,
        ),
    )
}

fn render_drives(drives: &[DriveSpace]) -> String {
    let mut rows = String::new();
    for drive in drives {
        let _ = write!(
            rows,
            "<tr><td class='mono'>{}</td><td>{:.2} GB</td><td>{:.2} GB</td><td>{:.2} GB</td></tr>",
            escape(&drive.name),
            drive.used_gb(),
            drive.free_gb(),
            drive.total_gb()
        );
    }
    format!(
        "<section><h1>Disk space</h1><table><tr><th>Drive</th><th>Used</th><th>Free</th><th>Total</th></tr>{rows}</table></section>"
    )
}

fn render_upload(directories: &[String]) -> String {
    let mut options = String::new();
    for dir in directories {
        let dir = escape(dir);
        let _ = write!(options, "<option value='{dir}'>{dir}</option>");
    }
    page(
        "Upload",
        &format!(
            "<section><h1>Upload pictures</h1><form method='post' action='/upload' enctype='multipart/form-data'>\
<label>Folder<select name='directory'>{options}</select></label>\
<label>Or create a new folder<input name='new_directory' maxlength='64'></label>\
<label>Pictures<input type='file' name='files' accept='image/*' multiple></label>\
<button type='submit'>Upload</button></form></section>"
        ),
    )
}

fn text_page(title: &str, text: &str) -> String {
    page(
        title,
        &format!("<section><h1>{title}</h1><pre>{}</pre></section>", escape(text)),
    )
}

fn message_page(title: &str, message: &str, back: &str) -> String {
    page(
        title,
        &format!(
            "<section class='status'><h1>{title}</h1><p>{}</p><p class='back'><a href='{back}'>Back</a></p></section>",
            escape(message)
        ),
    )
}

fn error_page(message: &str, back: &str) -> String {
    page(
        "Error",
        &format!(
            "<section class='status error'><h1>Something went wrong</h1><p>{}</p><p class='back'><a href='{back}'>Back</a></p></section>",
            escape(message)
        ),
    )
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html><html lang='en'><head><meta charset='utf-8'><meta name='viewport' content='width=device-width,initial-scale=1'>\
<title>{title}</title><style>{}</style></head><body><nav><a href='/'>Home</a><a href='/settings'>Settings</a><a href='/upload'>Upload</a>\
<a href='/system'>System</a><a href='/about'>About</a></nav><main>{body}</main></body></html>",
        styles()
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn styles() -> &'static str {
    "body{font-family:system-ui,sans-serif;margin:0;background:#101418;color:#eef2f5;}nav{display:flex;gap:1.2rem;padding:1rem 1.5rem;background:#1b232b;}nav a{color:#8ecae6;text-decoration:none;font-weight:600;}main{max-width:760px;margin:0 auto;padding:2rem 1.25rem;}section{background:#1b232b;padding:1.75rem;border-radius:16px;margin-bottom:1.5rem;}section h1{margin-top:0;}section.status.error{border:2px solid #ef476f;}form{display:flex;flex-direction:column;gap:0.9rem;margin-bottom:1rem;}fieldset{border:1px solid #33414d;border-radius:12px;display:flex;gap:1rem;flex-wrap:wrap;}label{display:flex;flex-direction:column;font-weight:600;}label.inline{flex-direction:row;align-items:center;gap:0.4rem;}input,select{margin-top:0.35rem;padding:0.6rem;border-radius:10px;border:none;background:#101418;color:#eef2f5;font-size:1rem;}button{padding:0.8rem;border:none;border-radius:12px;font-size:1rem;font-weight:700;background:#219ebc;color:#fff;cursor:pointer;}button.danger{background:#ef476f;}table{width:100%;border-collapse:collapse;}td,th{text-align:left;padding:0.4rem;border-bottom:1px solid #33414d;}pre{white-space:pre-wrap;font-size:0.85rem;}.mono{font-family:monospace;word-break:break-all;}p.back a{color:#8ecae6;text-decoration:none;font-weight:600;}"
}
