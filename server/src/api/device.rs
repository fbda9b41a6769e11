use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post, put},
};
use nfcctl_driver::{Error, NfcState, ReadMode, Readiness, UartState};
use nfcctl_sim::SimDevice;
use serde::{Deserialize, Serialize};

use crate::AppState;

/// Wait applied to blocking reads when the client gives none
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

type ApiError = (StatusCode, String);

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(device_status))
        .route("/open", post(open))
        .route("/close", post(close))
        .route("/mode", put(set_mode))
        .route("/uart", put(set_uart))
        .route("/write", post(write))
        .route("/read", get(read))
        .route("/poll", get(poll))
        .route("/suspend", post(suspend))
        .route("/resume", post(resume))
        .route("/control", post(control))
        .route("/fault", post(inject_fault))
}

fn status_code(e: &Error) -> StatusCode {
    match e {
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        Error::Busy => StatusCode::CONFLICT,
        Error::WouldBlock => StatusCode::NO_CONTENT,
        Error::IoError(_) => StatusCode::BAD_GATEWAY,
        Error::Restart => StatusCode::SERVICE_UNAVAILABLE,
        Error::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        Error::SuspendRejected => StatusCode::FORBIDDEN,
        Error::PinControl(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(e: Error) -> ApiError {
    match status_code(&e) {
        // 204 carries no body
        StatusCode::NO_CONTENT => (StatusCode::NO_CONTENT, String::new()),
        status => (status, format!("{} (errno {})", e, e.errno())),
    }
}

/// Device calls sleep through line sequencing, so keep them off the async workers.
async fn run_blocking<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&SimDevice) -> nfcctl_driver::Result<T> + Send + 'static,
{
    let device = Arc::clone(&state.device);
    tokio::task::spawn_blocking(move || op(&device))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(api_error)
}

fn readiness_name(readiness: Readiness) -> &'static str {
    match readiness {
        Readiness::None => "none",
        Readiness::DataReady => "data_ready",
        Readiness::RetryNeeded => "retry_needed",
    }
}

#[derive(Debug, Serialize)]
pub struct DeviceStatus {
    state: &'static str,
    mode: u32,
    readiness: &'static str,
    readable: bool,
    power_enable: bool,
    firmware_select: bool,
    wake_held: bool,
    fast_timings: bool,
}

/// GET /api/device/status - Controller state and line levels
async fn device_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DeviceStatus>, ApiError> {
    let fast_timings = state.config.fast_timings;
    let (status, readable) =
        run_blocking(&state, |device| Ok((device.status(), device.poll_readable()))).await?;

    Ok(Json(DeviceStatus {
        state: status.state.as_str(),
        mode: status.state as u32,
        readiness: readiness_name(status.readiness),
        readable,
        power_enable: status.power_enable,
        firmware_select: status.firmware_select,
        wake_held: status.wake_held,
        fast_timings,
    }))
}

/// POST /api/device/open - Power the controller up in normal mode
async fn open(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    run_blocking(&state, |device| device.open()).await?;
    Ok(StatusCode::OK)
}

/// POST /api/device/close - Power the controller off
async fn close(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    run_blocking(&state, |device| {
        device.close();
        Ok(())
    })
    .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: u32,
}

/// PUT /api/device/mode - Change the operating state
async fn set_mode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModeRequest>,
) -> Result<StatusCode, ApiError> {
    let mode = NfcState::try_from(request.mode).map_err(api_error)?;
    run_blocking(&state, move |device| device.set_mode(mode)).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct UartRequest {
    pub on: bool,
}

/// PUT /api/device/uart - Route the UART to the controller
async fn set_uart(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UartRequest>,
) -> Result<StatusCode, ApiError> {
    let uart = if request.on {
        UartState::On
    } else {
        UartState::Off
    };
    run_blocking(&state, move |device| device.set_uart_state(uart)).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub data: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct WriteResponse {
    written: usize,
}

/// POST /api/device/write - Send one message
async fn write(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WriteRequest>,
) -> Result<Json<WriteResponse>, ApiError> {
    let written = run_blocking(&state, move |device| device.write(&request.data)).await?;
    Ok(Json(WriteResponse { written }))
}

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub max_len: usize,
    #[serde(default)]
    pub blocking: bool,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ReadResponse {
    data: Vec<u8>,
}

/// GET /api/device/read - Read one message
///
/// A blocking read waits at most `timeout_ms` for data, then answers 204 if
/// nothing arrived.
async fn read(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReadQuery>,
) -> Result<Json<ReadResponse>, ApiError> {
    let timeout = query
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_READ_TIMEOUT);

    let data = run_blocking(&state, move |device| {
        if query.blocking {
            device.wait_readable(timeout);
        }
        device.read(query.max_len, ReadMode::NonBlocking)
    })
    .await?;
    Ok(Json(ReadResponse { data }))
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    readable: bool,
}

/// GET /api/device/poll - Whether a read would find data
async fn poll(State(state): State<Arc<AppState>>) -> Json<PollResponse> {
    Json(PollResponse {
        readable: state.device.poll_readable(),
    })
}

/// POST /api/device/suspend - Host suspend hook
async fn suspend(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    run_blocking(&state, |device| device.suspend()).await?;
    Ok(StatusCode::OK)
}

/// POST /api/device/resume - Host resume hook
async fn resume(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    run_blocking(&state, |device| device.resume()).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub cmd: u32,
    #[serde(default)]
    pub arg: u32,
}

/// POST /api/device/control - Raw control request
async fn control(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ControlRequest>,
) -> Result<StatusCode, ApiError> {
    run_blocking(&state, move |device| device.ioctl(request.cmd, request.arg)).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct FaultRequest {
    pub count: usize,
}

/// POST /api/device/fault - Make the simulated controller stop answering
async fn inject_fault(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FaultRequest>,
) -> StatusCode {
    tracing::warn!(count = request.count, "injecting unresponsive bus transfers");
    state.chip.inject_unresponsive(request.count);
    StatusCode::OK
}
