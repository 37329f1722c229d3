use serde::{Deserialize, Serialize};
use thinkdrop_common::{Error, ErrorCode, Result};
use thinkdrop_memory::RequestContext;

pub const PROTOCOL_VERSION: &str = "mcp.v1";
pub const SERVICE_NAME: &str = "user-memory";

/// Incoming request envelope shared by every action.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub version: String,
    pub service: String,
    pub action: String,
    pub request_id: String,
    #[serde(default)]
    pub context: RequestContext,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RequestEnvelope {
    /// Shape validation, after auth and before dispatch. The envelope's
    /// action must agree with the route it was posted to.
    pub fn validate(&self, path_action: &str) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(Error::InvalidRequest(format!(
                "unsupported version {:?}, expected {PROTOCOL_VERSION:?}",
                self.version
            )));
        }
        if self.service != SERVICE_NAME {
            return Err(Error::InvalidRequest(format!(
                "unknown service {:?}, expected {SERVICE_NAME:?}",
                self.service
            )));
        }
        if self.action.trim().is_empty() || self.request_id.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "action and requestId are required".into(),
            ));
        }
        if self.action != path_action {
            return Err(Error::InvalidRequest(format!(
                "envelope action {:?} does not match route {path_action:?}",
                self.action
            )));
        }
        Ok(())
    }

    /// Deserialize the opaque payload into the action's expected shape.
    pub fn parse_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| Error::InvalidRequest(format!("invalid payload: {e}")))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetrics {
    pub elapsed_ms: u64,
}

/// Uniform response envelope: `status` is `ok` or `error`, never both
/// `data` and `error` populated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub version: &'static str,
    pub service: &'static str,
    pub action: String,
    pub request_id: String,
    pub status: &'static str,
    pub data: Option<serde_json::Value>,
    pub error: Option<ErrorBody>,
    pub metrics: ResponseMetrics,
}

impl ResponseEnvelope {
    pub fn ok(
        action: impl Into<String>,
        request_id: impl Into<String>,
        data: serde_json::Value,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            service: SERVICE_NAME,
            action: action.into(),
            request_id: request_id.into(),
            status: "ok",
            data: Some(data),
            error: None,
            metrics: ResponseMetrics { elapsed_ms },
        }
    }

    pub fn failure(
        action: impl Into<String>,
        request_id: impl Into<String>,
        error: &Error,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            service: SERVICE_NAME,
            action: action.into(),
            request_id: request_id.into(),
            status: "error",
            data: None,
            error: Some(ErrorBody {
                code: error.code(),
                message: error.to_string(),
            }),
            metrics: ResponseMetrics { elapsed_ms },
        }
    }
}
