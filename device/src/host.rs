use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use smart_leds::RGB8;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use justdoit_common::{
    DeviceStatus, DoneReceipt, DoneReport, PixelDriver, RuntimeConfig, Scheduler, ServiceError,
    Strip, StripError, SystemTimeSource, TaskList, TaskService, TaskSnapshot, TaskView, WallClock,
    DONE_PATH, TASKS_PATH,
};

const LOOP_TICK_MS: u64 = 200;
const TIME_SYNC_RETRY_SECS: u64 = 2;

/// Control-surface events funneled into the single device loop thread.
enum Command {
    Done(usize),
    Sync,
    SetAwake(bool),
}

#[derive(Clone)]
struct AppState {
    commands: Arc<Mutex<Vec<Command>>>,
    status: Arc<Mutex<Option<DeviceStatus>>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Stands in for the physical strip on dev machines: frames go to the log.
struct LogDriver;

impl PixelDriver for LogDriver {
    fn render(&mut self, frame: &[RGB8]) -> Result<(), StripError> {
        let rendered: String = frame
            .iter()
            .map(|color| format!("#{:02x}{:02x}{:02x} ", color.r, color.g, color.b))
            .collect();
        debug!("strip frame: {}", rendered.trim_end());
        Ok(())
    }
}

struct HttpTaskService {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpTaskService {
    fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build backend http client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl TaskService for HttpTaskService {
    fn fetch_tasks(&mut self, date: &str) -> Result<TaskSnapshot, ServiceError> {
        let url = format!("{}{}/{}", self.base_url, TASKS_PATH, date);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| ServiceError::Unreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status(status.as_u16()));
        }
        response
            .json::<TaskSnapshot>()
            .map_err(|err| ServiceError::Payload(err.to_string()))
    }

    fn report_done(&mut self, report: &DoneReport) -> Result<DoneReceipt, ServiceError> {
        let url = format!("{}{}", self.base_url, DONE_PATH);
        let response = self
            .client
            .post(&url)
            .json(report)
            .send()
            .map_err(|err| ServiceError::Unreachable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status(status.as_u16()));
        }
        response
            .json::<DoneReceipt>()
            .map_err(|err| ServiceError::Payload(err.to_string()))
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    if let Ok(url) = std::env::var("JUSTDOIT_BACKEND_URL") {
        runtime.network.backend_url = url;
    }

    if runtime.tasks.is_empty() {
        warn!("no tasks configured; the strip will stay dark");
    }

    let state = AppState {
        commands: Arc::new(Mutex::new(Vec::new())),
        status: Arc::new(Mutex::new(None)),
    };
    spawn_device_loop(state.clone(), runtime);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/done", post(handle_post_done))
        .route("/api/sync", post(handle_post_sync))
        .route("/api/awake", post(handle_post_awake))
        .with_state(state);

    let port = std::env::var("JUSTDOIT_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .context("invalid listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control server at {addr}"))?;

    info!("device simulator listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_device_loop(state: AppState, runtime: RuntimeConfig) {
    thread::Builder::new()
        .name("device-loop".into())
        .spawn(move || {
            if let Err(err) = run_device_loop(state, runtime) {
                warn!("device loop exited: {err:#}");
            }
        })
        .expect("failed to spawn device loop thread");
}

fn run_device_loop(state: AppState, runtime: RuntimeConfig) -> anyhow::Result<()> {
    let mut clock = WallClock::new(SystemTimeSource, &runtime.timezone)?;
    loop {
        match clock.sync() {
            Ok(()) => break,
            Err(err) => {
                warn!("time sync failed: {err}; retrying");
                thread::sleep(Duration::from_secs(TIME_SYNC_RETRY_SECS));
            }
        }
    }
    let today = clock.today().context("clock reports no date after sync")?;
    info!("time synced; local date is {today}");

    let strip = Arc::new(Mutex::new(Strip::new(&runtime.strip, LogDriver)));
    let tasks = Arc::new(Mutex::new(TaskList::new(&today, runtime.tasks.clone())));
    let service = Arc::new(Mutex::new(HttpTaskService::new(
        &runtime.network.backend_url,
    )?));
    let clock = Arc::new(Mutex::new(clock));

    let mut scheduler = Scheduler::new();
    let now = {
        let clock = clock.lock().unwrap();
        clock.now().context("clock unsynced after successful sync")?
    };

    {
        let strip = strip.clone();
        let tasks = tasks.clone();
        let service = service.clone();
        scheduler.on_interval(
            runtime.sync.interval_minutes,
            now,
            Box::new(move || {
                let mut strip = strip.lock().unwrap();
                let mut tasks = tasks.lock().unwrap();
                let mut service = service.lock().unwrap();
                if let Err(err) = strip.sync(&mut tasks, &mut *service) {
                    warn!("periodic sync failed: {err}");
                }
            }),
        );
    }

    {
        let strip = strip.clone();
        let tasks = tasks.clone();
        let service = service.clone();
        let clock = clock.clone();
        scheduler.on_next_day(
            now,
            Box::new(move || {
                let Some(date) = clock.lock().unwrap().today() else {
                    return;
                };
                info!("day rollover to {date}");
                let mut strip = strip.lock().unwrap();
                let mut tasks = tasks.lock().unwrap();
                let mut service = service.lock().unwrap();
                if let Err(err) = strip.new_day(&date, &mut tasks) {
                    warn!("day rollover render failed: {err}");
                }
                if let Err(err) = strip.sync(&mut tasks, &mut *service) {
                    warn!("post-rollover sync failed: {err}");
                }
            }),
        );
    }

    // First paint and an eager reconcile so the strip is meaningful at boot.
    {
        let mut strip = strip.lock().unwrap();
        let mut tasks = tasks.lock().unwrap();
        let mut service = service.lock().unwrap();
        strip.visualize(&tasks);
        if let Err(err) = strip.show() {
            warn!("initial render failed: {err}");
        }
        if let Err(err) = strip.sync(&mut tasks, &mut *service) {
            warn!("initial sync failed: {err}");
        }
    }

    loop {
        let now = { clock.lock().unwrap().now() };
        if let Some(now) = now {
            scheduler.poll(now);
        }

        let queued: Vec<Command> = {
            let mut commands = state.commands.lock().unwrap();
            commands.drain(..).collect()
        };
        for command in queued {
            apply_command(command, &clock, &strip, &tasks, &service);
        }

        let status = {
            let clock = clock.lock().unwrap();
            let strip = strip.lock().unwrap();
            let tasks = tasks.lock().unwrap();
            build_status(&clock, &strip, &tasks, &scheduler)
        };
        *state.status.lock().unwrap() = Some(status);

        thread::sleep(Duration::from_millis(LOOP_TICK_MS));
    }
}

fn apply_command(
    command: Command,
    clock: &Arc<Mutex<WallClock<SystemTimeSource>>>,
    strip: &Arc<Mutex<Strip<LogDriver>>>,
    tasks: &Arc<Mutex<TaskList>>,
    service: &Arc<Mutex<HttpTaskService>>,
) {
    match command {
        Command::Done(slot) => {
            let Some(date) = clock.lock().unwrap().today() else {
                warn!("ignoring done request for slot {slot}: time not synced");
                return;
            };
            let mut strip = strip.lock().unwrap();
            let mut tasks = tasks.lock().unwrap();
            let mut service = service.lock().unwrap();
            match strip.done(slot, &date, &mut tasks, &mut *service) {
                Ok(()) => info!("slot {slot} marked done for {date}"),
                Err(err) => warn!("marking slot {slot} done failed: {err}"),
            }
        }
        Command::Sync => {
            let mut strip = strip.lock().unwrap();
            let mut tasks = tasks.lock().unwrap();
            let mut service = service.lock().unwrap();
            match strip.sync(&mut tasks, &mut *service) {
                Ok(()) => info!("manual sync complete"),
                Err(err) => warn!("manual sync failed: {err}"),
            }
        }
        Command::SetAwake(awake) => {
            let mut strip = strip.lock().unwrap();
            if let Err(err) = strip.set_awake(awake) {
                warn!("awake toggle render failed: {err}");
            }
        }
    }
}

fn build_status(
    clock: &WallClock<SystemTimeSource>,
    strip: &Strip<LogDriver>,
    tasks: &TaskList,
    scheduler: &Scheduler,
) -> DeviceStatus {
    DeviceStatus {
        date: clock.today(),
        time_synced: clock.is_synced(),
        timezone: clock.timezone().to_string(),
        awake: strip.is_awake(),
        loading_pixel: strip.loading_pixel(),
        pixel_count: strip.pixel_count(),
        next_sync_epoch: scheduler.interval_due().map(|due| due.timestamp()),
        next_rollover_epoch: scheduler.day_rollover_due().map(|due| due.timestamp()),
        unsynced_completions: tasks.unsynced_count(),
        tasks: (0..tasks.len())
            .filter_map(|slot| {
                let task = tasks.get(slot)?;
                Some(TaskView {
                    name: task.name.clone(),
                    status: tasks.status(slot)?.as_str(),
                    streak: task.streak,
                })
            })
            .collect(),
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.lock().unwrap().clone();
    match status {
        Some(status) => Json(status).into_response(),
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Device loop has not published a status yet",
        ),
    }
}

async fn handle_post_done(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(slot) = params.get("slot").and_then(|value| value.parse::<usize>().ok()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing or invalid 'slot' parameter");
    };

    state.commands.lock().unwrap().push(Command::Done(slot));
    handle_get_status(State(state)).await.into_response()
}

async fn handle_post_sync(State(state): State<AppState>) -> impl IntoResponse {
    state.commands.lock().unwrap().push(Command::Sync);
    handle_get_status(State(state)).await.into_response()
}

async fn handle_post_awake(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(awake) = params.get("value").and_then(|value| value.parse::<bool>().ok()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing or invalid 'value' parameter (true/false)",
        );
    };

    state.commands.lock().unwrap().push(Command::SetAwake(awake));
    handle_get_status(State(state)).await.into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn data_dir() -> PathBuf {
    std::env::var("JUSTDOIT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.justdoit"))
}

fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let path = data_dir().join("runtime.json");
    match std::fs::read(&path) {
        Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}
