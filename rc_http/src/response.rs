use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::AppError;
use crate::errors::ErrorKind;
use crate::errors::Severity;
use crate::errors::keys;

/// Parsed body of a successful response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Empty,
}

impl ResponseBody {
    /// Parse by content type: JSON types are decoded, anything else is text
    pub fn parse(content_type: Option<&str>, bytes: &[u8]) -> Result<Self, AppError> {
        if bytes.is_empty() {
            return Ok(ResponseBody::Empty);
        }

        let is_json = content_type.map(|ct| ct.to_ascii_lowercase().contains("json")).unwrap_or(false);
        if is_json {
            serde_json::from_slice(bytes)
                .map(ResponseBody::Json)
                .map_err(|e| AppError::new(format!("Failed to parse JSON response: {e}"), ErrorKind::Unknown, Severity::Medium).with_source(e))
        } else {
            Ok(ResponseBody::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) => Value::String(text),
            ResponseBody::Empty => Value::Null,
        }
    }

    /// Decode into the caller's type
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, AppError> {
        serde_json::from_value(self.into_value())
            .map_err(|e| AppError::new(format!("Failed to decode response body: {e}"), ErrorKind::Unknown, Severity::Medium).with_source(e))
    }
}

/// Successful response as seen by response interceptors
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub request_id: String,
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: ResponseBody,
}

/// Uniform result of every call
///
/// Callers branch on `success` and `error`; `data` is populated exactly when
/// the call succeeded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope<T> {
    pub data: Option<T>,
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub success: bool,
    pub error: Option<AppError>,
}

impl<T> ResponseEnvelope<T> {
    pub fn ok(data: T, status: u16, status_text: String, headers: BTreeMap<String, String>) -> Self {
        Self { data: Some(data), status, status_text, headers, success: true, error: None }
    }

    /// Failed envelope carrying the status recorded on the error, or 0
    pub fn failed(error: AppError) -> Self {
        let status = error.status().unwrap_or(0);
        let status_text = error.context_value(keys::STATUS_TEXT).map(|v| v.to_string()).unwrap_or_default();
        Self { data: None, status, status_text, headers: BTreeMap::new(), success: false, error: Some(error) }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ResponseEnvelope<U> {
        ResponseEnvelope {
            data: self.data.map(f),
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            success: self.success,
            error: self.error,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(AppError::kind)
    }

    pub fn into_result(self) -> Result<T, AppError> {
        match (self.data, self.error) {
            (_, Some(error)) => Err(error),
            (Some(data), None) => Ok(data),
            (None, None) => Err(AppError::new("Response carried no data", ErrorKind::Unknown, Severity::Low)),
        }
    }
}

impl From<RawResponse> for ResponseEnvelope<ResponseBody> {
    fn from(raw: RawResponse) -> Self {
        ResponseEnvelope::ok(raw.body, raw.status, raw.status_text, raw.headers)
    }
}
