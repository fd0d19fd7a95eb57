use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use embedded_svc::{
    http::{client::Client as HttpClient, server::Connection, server::Request, Method, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    http::server::{Configuration as HttpServerConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::{EspSntp, SyncStatus},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use justdoit_common::{
    ClockError, DeviceStatus, DoneReceipt, DoneReport, NetworkConfig, RuntimeConfig, Scheduler,
    ServiceError, Strip, TaskList, TaskService, TaskSnapshot, TaskView, TimeSource, WallClock,
    DONE_PATH, TASKS_PATH,
};

use crate::neopixel::NeopixelDriver;

const NVS_NAMESPACE: &str = "justdoit";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const MAX_HTTP_BODY: usize = 4096;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const TIME_SYNC_RETRY_SECS: u64 = 2;
const LOOP_TICK_MS: u64 = 200;

/// Control-surface events funneled into the single control-loop thread.
enum Command {
    Done(usize),
    Sync,
    SetAwake(bool),
}

#[derive(Clone)]
struct SharedState {
    commands: Arc<Mutex<Vec<Command>>>,
    status: Arc<Mutex<Option<DeviceStatus>>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct Queued {
    queued: bool,
}

/// SNTP-disciplined time source. `synchronize` only succeeds once SNTP
/// reports a completed sync, after which the system clock is trustworthy.
struct SntpTimeSource {
    sntp: EspSntp<'static>,
}

impl TimeSource for SntpTimeSource {
    fn synchronize(&mut self) -> Result<(), ClockError> {
        match self.sntp.get_sync_status() {
            SyncStatus::Completed => Ok(()),
            status => Err(ClockError::SourceUnavailable(format!(
                "sntp status {status:?}"
            ))),
        }
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct EspTaskService {
    base_url: String,
}

impl EspTaskService {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn connection(&self) -> Result<EspHttpConnection, ServiceError> {
        let conf = HttpClientConfiguration {
            timeout: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        EspHttpConnection::new(&conf)
            .map_err(|err| ServiceError::Unreachable(format!("{err:?}")))
    }

    fn read_body<R: Read>(response: &mut R) -> Result<Vec<u8>, ServiceError> {
        let mut body = Vec::new();
        let mut chunk = [0_u8; 512];
        loop {
            let read = response
                .read(&mut chunk)
                .map_err(|err| ServiceError::Unreachable(format!("{err:?}")))?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
            if body.len() > MAX_HTTP_BODY {
                return Err(ServiceError::Payload("response body too large".to_string()));
            }
        }
        Ok(body)
    }
}

impl TaskService for EspTaskService {
    fn fetch_tasks(&mut self, date: &str) -> Result<TaskSnapshot, ServiceError> {
        let url = format!("{}{}/{}", self.base_url, TASKS_PATH, date);
        let mut client = HttpClient::wrap(self.connection()?);
        let request = client
            .request(Method::Get, &url, &[])
            .map_err(|err| ServiceError::Unreachable(format!("{err:?}")))?;
        let mut response = request
            .submit()
            .map_err(|err| ServiceError::Unreachable(format!("{err:?}")))?;

        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(ServiceError::Status(status));
        }
        let body = Self::read_body(&mut response)?;
        serde_json::from_slice(&body).map_err(|err| ServiceError::Payload(err.to_string()))
    }

    fn report_done(&mut self, report: &DoneReport) -> Result<DoneReceipt, ServiceError> {
        let url = format!("{}{}", self.base_url, DONE_PATH);
        let payload =
            serde_json::to_vec(report).map_err(|err| ServiceError::Payload(err.to_string()))?;

        let mut client = HttpClient::wrap(self.connection()?);
        let mut request = client
            .request(Method::Post, &url, &[("Content-Type", "application/json")])
            .map_err(|err| ServiceError::Unreachable(format!("{err:?}")))?;
        request
            .write_all(&payload)
            .map_err(|err| ServiceError::Unreachable(format!("{err:?}")))?;
        let mut response = request
            .submit()
            .map_err(|err| ServiceError::Unreachable(format!("{err:?}")))?;

        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(ServiceError::Status(status));
        }
        let body = Self::read_body(&mut response)?;
        serde_json::from_slice(&body).map_err(|err| ServiceError::Payload(err.to_string()))
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let (mut runtime, provisioned) = match load_runtime_config(&nvs_partition) {
        Ok(Some(config)) => (config, true),
        Ok(None) => (RuntimeConfig::default(), false),
        Err(err) => {
            warn!("failed to load runtime config from NVS: {err:#}");
            (RuntimeConfig::default(), false)
        }
    };
    runtime.sanitize();
    ensure_wifi_defaults(&mut runtime);
    if !provisioned {
        if let Err(err) = save_runtime_config(&nvs_partition, &runtime) {
            warn!("failed to seed NVS config: {err:#}");
        }
    }

    info!(
        "config loaded: {} pixels on GPIO{}, sync every {}min, backend `{}`",
        runtime.strip.pixel_count,
        runtime.strip.data_pin,
        runtime.sync.interval_minutes,
        runtime.network.backend_url,
    );

    let peripherals = Peripherals::take()?;
    let _wifi = connect_wifi(
        peripherals.modem,
        sys_loop,
        nvs_partition.clone(),
        &runtime.network,
    )
    .context("wifi startup failed")?;
    info!("wifi connected");

    let sntp = EspSntp::new_default().context("failed to start SNTP")?;
    let mut clock = WallClock::new(SntpTimeSource { sntp }, &runtime.timezone)?;
    loop {
        match clock.sync() {
            Ok(()) => break,
            Err(err) => {
                info!("waiting for time sync: {err}");
                thread::sleep(Duration::from_secs(TIME_SYNC_RETRY_SECS));
            }
        }
    }
    let today = clock.today().context("clock reports no date after sync")?;
    info!("time synced; local date is {today}");

    let driver = NeopixelDriver::new(peripherals.rmt.channel0, runtime.strip.data_pin)?;
    let strip = Arc::new(Mutex::new(Strip::new(&runtime.strip, driver)));
    let tasks = Arc::new(Mutex::new(TaskList::new(&today, runtime.tasks.clone())));
    let service = Arc::new(Mutex::new(EspTaskService::new(
        &runtime.network.backend_url,
    )));
    let clock = Arc::new(Mutex::new(clock));

    let state = SharedState {
        commands: Arc::new(Mutex::new(Vec::new())),
        status: Arc::new(Mutex::new(None)),
    };
    let _server = create_http_server(state.clone())?;

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
    clock: &Arc<Mutex<WallClock<SntpTimeSource>>>,
    strip: &Arc<Mutex<Strip<NeopixelDriver>>>,
    tasks: &Arc<Mutex<TaskList>>,
    service: &Arc<Mutex<EspTaskService>>,
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
    clock: &WallClock<SntpTimeSource>,
    strip: &Strip<NeopixelDriver>,
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

fn create_http_server(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpServerConfiguration {
        stack_size: 8 * 1024,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/status", Method::Get, move |req| {
            let status = state.status.lock().unwrap().clone();
            match status {
                Some(status) => write_json(req, &status),
                None => write_error(req, 503, "Device loop has not published a status yet"),
            }
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/done", Method::Post, move |req| {
            let uri = req.uri().to_string();
            let Some(slot) = query_param(&uri, "slot").and_then(|value| value.parse::<usize>().ok())
            else {
                return write_error(req, 400, "Missing or invalid 'slot' parameter");
            };
            state.commands.lock().unwrap().push(Command::Done(slot));
            write_json(req, &Queued { queued: true })
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/sync", Method::Post, move |req| {
            state.commands.lock().unwrap().push(Command::Sync);
            write_json(req, &Queued { queued: true })
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/awake", Method::Post, move |req| {
            let uri = req.uri().to_string();
            let Some(awake) = query_param(&uri, "value").and_then(|value| value.parse::<bool>().ok())
            else {
                return write_error(req, 400, "Missing or invalid 'value' parameter (true/false)");
            };
            state.commands.lock().unwrap().push(Command::SetAwake(awake));
            write_json(req, &Queued { queued: true })
        })?;
    }

    Ok(server)
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    if network.wifi_ssid.trim().is_empty() {
        return Err(anyhow!(
            "wifi credentials missing; provision NVS or build with WIFI_SSID/WIFI_PASS"
        ));
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect() {
            Ok(()) => match wifi.wait_netif_up() {
                Ok(()) => {
                    info!("wifi connected and netif up on attempt {attempt}");
                    last_err = None;
                    break;
                }
                Err(err) => {
                    warn!("wifi netif up failed on attempt {attempt}: {err:#}");
                    last_err = Some(err);
                }
            },
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    match last_err {
        None => Ok(esp_wifi),
        Some(err) => Err(anyhow!(
            "all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed: {err:#}"
        )),
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

fn load_runtime_config(
    partition: &EspDefaultNvsPartition,
) -> anyhow::Result<Option<RuntimeConfig>> {
    let mut nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 4096];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(Some(serde_json::from_str::<RuntimeConfig>(value)?)),
        None => Ok(None),
    }
}

fn save_runtime_config(
    partition: &EspDefaultNvsPartition,
    runtime: &RuntimeConfig,
) -> anyhow::Result<()> {
    let mut nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let payload = serde_json::to_string(runtime)?;
    nvs.set_str(NVS_RUNTIME_KEY, &payload)?;
    Ok(())
}

fn query_param(uri: &str, key: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == key).then(|| value.to_string())
    })
}

fn write_json<C, T>(req: Request<C>, payload: &T) -> anyhow::Result<()>
where
    C: Connection,
    C::Error: std::error::Error + Send + Sync + 'static,
    T: Serialize,
{
    let body = serde_json::to_vec(payload)?;
    let mut response =
        req.into_response(200, Some("OK"), &[("Content-Type", "application/json")])?;
    response.write_all(&body)?;
    Ok(())
}

fn write_error<C>(req: Request<C>, code: u16, message: &str) -> anyhow::Result<()>
where
    C: Connection,
    C::Error: std::error::Error + Send + Sync + 'static,
{
    let body = serde_json::to_vec(&ErrorBody {
        error: message.to_string(),
    })?;
    let mut response =
        req.into_response(code, None, &[("Content-Type", "application/json")])?;
    response.write_all(&body)?;
    Ok(())
}
