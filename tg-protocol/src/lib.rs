use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Lowest accepted throttle threshold (°C)
pub const MIN_THRESHOLD: i32 = 40;

/// Highest accepted throttle threshold (°C)
pub const MAX_THRESHOLD: i32 = 90;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    GetStatus,
    GetHotplugEnabled,
    SetHotplugEnabled { enabled: bool },
    GetThreshold,
    SetThreshold { celsius: i32 },
    GetWarmFrequency,
    /// Always rejected by the daemon: the warm frequency is fixed at startup
    SetWarmFrequency { khz: u32 },
    GetCore0Permission,
    SetCore0Permission { value: u8 },
}

impl Request {
    /// Validate request parameters before sending to daemon
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping
            | Request::Version
            | Request::GetStatus
            | Request::GetHotplugEnabled
            | Request::SetHotplugEnabled { .. }
            | Request::GetThreshold
            | Request::GetWarmFrequency
            | Request::SetWarmFrequency { .. }
            | Request::GetCore0Permission => Ok(()),

            Request::SetThreshold { celsius } => validate_threshold(*celsius),
            Request::SetCore0Permission { value } => validate_core0_permission(*value),
        }
    }

    /// Whether the request mutates governor state
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Request::SetHotplugEnabled { .. }
                | Request::SetThreshold { .. }
                | Request::SetWarmFrequency { .. }
                | Request::SetCore0Permission { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::GetStatus => "GetStatus",
            Request::GetHotplugEnabled => "GetHotplugEnabled",
            Request::SetHotplugEnabled { .. } => "SetHotplugEnabled",
            Request::GetThreshold => "GetThreshold",
            Request::SetThreshold { .. } => "SetThreshold",
            Request::GetWarmFrequency => "GetWarmFrequency",
            Request::SetWarmFrequency { .. } => "SetWarmFrequency",
            Request::GetCore0Permission => "GetCore0Permission",
            Request::SetCore0Permission { .. } => "SetCore0Permission",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response payload; exactly one field is set per request type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub celsius: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub khz: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<GovernorStatus>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn toggle(e: bool) -> Self { Self { enabled: Some(e), ..Self::default() } }
    pub fn temperature(c: i32) -> Self { Self { celsius: Some(c), ..Self::default() } }
    pub fn frequency(f: u32) -> Self { Self { khz: Some(f), ..Self::default() } }
    pub fn permission(p: u8) -> Self { Self { permission: Some(p), ..Self::default() } }
    pub fn governor(s: GovernorStatus) -> Self { Self { status: Some(s), ..Self::default() } }
}

/// Snapshot of the governor published after every tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorStatus {
    /// "quad", "hexa" or "octa"
    pub topology: String,
    pub sensor_id: u32,
    /// Last successful reading (°C)
    pub temperature: Option<i32>,
    /// Unix time of the last completed tick, in milliseconds
    pub last_tick_ms: Option<u64>,
    pub hotplug_enabled: bool,
    pub core0_permission: bool,
    pub threshold: i32,
    pub hysteresis_margin: i32,
    pub warm_frequency_khz: u32,
    /// None while unrestricted
    pub current_cap_khz: Option<u32>,
    pub throttling: bool,
    pub online_cores: Vec<usize>,
    pub tick_count: u64,
    pub consecutive_sensor_failures: u32,
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn ok_toggle(e: bool) -> Self {
        Response::Ok(ResponseData::toggle(e))
    }

    pub fn ok_temp(c: i32) -> Self {
        Response::Ok(ResponseData::temperature(c))
    }

    pub fn ok_freq(khz: u32) -> Self {
        Response::Ok(ResponseData::frequency(khz))
    }

    pub fn ok_permission(p: u8) -> Self {
        Response::Ok(ResponseData::permission(p))
    }

    pub fn ok_status(s: GovernorStatus) -> Self {
        Response::Ok(ResponseData::governor(s))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}

pub fn validate_threshold(celsius: i32) -> Result<(), String> {
    if celsius < MIN_THRESHOLD {
        return Err(format!("Threshold too low (minimum {})", MIN_THRESHOLD));
    }
    if celsius > MAX_THRESHOLD {
        return Err(format!("Threshold too high (maximum {})", MAX_THRESHOLD));
    }
    Ok(())
}

pub fn validate_core0_permission(value: u8) -> Result<(), String> {
    if value > 1 {
        return Err("Core 0 permission must be 0 or 1".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_bounds_are_inclusive() {
        assert!(validate_threshold(40).is_ok());
        assert!(validate_threshold(90).is_ok());
        assert!(validate_threshold(39).is_err());
        assert!(validate_threshold(91).is_err());
    }

    #[test]
    fn core0_permission_accepts_only_bits() {
        assert!(Request::SetCore0Permission { value: 0 }.validate().is_ok());
        assert!(Request::SetCore0Permission { value: 1 }.validate().is_ok());
        assert!(Request::SetCore0Permission { value: 2 }.validate().is_err());
    }

    #[test]
    fn request_wire_format() {
        let envelope = RequestEnvelope::with_id(Request::SetThreshold { celsius: 65 }, 7);
        let json = serde_json::to_string(&envelope).expect("request serializes");
        assert_eq!(json, r#"{"id":7,"cmd":"SetThreshold","data":{"celsius":65}}"#);

        let unit = serde_json::to_string(&RequestEnvelope::with_id(Request::Ping, 1))
            .expect("unit request serializes");
        assert_eq!(unit, r#"{"id":1,"cmd":"Ping"}"#);
    }

    #[test]
    fn error_response_wire_format() {
        let envelope = ResponseEnvelope::new(3, Response::error("Threshold too low (minimum 40)"));
        let json = serde_json::to_string(&envelope).expect("response serializes");
        assert_eq!(json, r#"{"id":3,"status":"error","message":"Threshold too low (minimum 40)"}"#);
    }

    #[test]
    fn writes_are_flagged() {
        assert!(Request::SetWarmFrequency { khz: 800_000 }.is_write());
        assert!(Request::SetHotplugEnabled { enabled: false }.is_write());
        assert!(!Request::GetStatus.is_write());
    }
}
