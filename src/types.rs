use std::time::Instant;

use bytes::Bytes;
use serde_json::Value;

use crate::CallError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallStatus {
    Ok,
    ClientError,
    ServerError,
    NetworkFailure,
    /// The response could not be transcoded. Distinct from upstream errors.
    InternalError,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttemptOutcome {
    Pending,
    Success,
    TransientFailure,
    FatalFailure,
}

/// Diagnostic record of one outbound attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallAttempt {
    pub attempt_index: usize,
    pub deadline: Instant,
    pub outcome: AttemptOutcome,
    pub http_status: Option<u16>,
    /// Timeout or transport error text, if any.
    pub detail: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DispositionMode {
    #[default]
    Attachment,
    Inline,
}

impl DispositionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attachment => "attachment",
            Self::Inline => "inline",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryPayload {
    pub bytes: Bytes,
    pub content_type: String,
    pub suggested_filename: String,
    pub disposition: DispositionMode,
}

impl BinaryPayload {
    /// `Content-Disposition` header value for streaming the payload back.
    pub fn content_disposition(&self) -> String {
        format!(
            "{}; filename=\"{}\"",
            self.disposition.as_str(),
            self.suggested_filename
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectTarget {
    pub locator: String,
}

/// Normalized response body.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    Structured(Value),
    Binary(BinaryPayload),
    Redirect(RedirectTarget),
    /// Body matched no expected shape; holds a lossy preview of its bytes.
    Malformed { preview: String },
}

/// Outcome of one top-level [`RetryingCaller::call`](crate::RetryingCaller::call).
#[derive(Clone, Debug, PartialEq)]
pub struct CallResult {
    pub status: CallStatus,
    /// Last upstream status observed, if any response arrived.
    pub http_status: Option<u16>,
    pub body: Option<ResponseBody>,
    pub attempts: Vec<CallAttempt>,
    pub error: Option<CallError>,
}

impl CallResult {
    pub(crate) fn auth_required() -> Self {
        Self {
            status: CallStatus::ClientError,
            http_status: None,
            body: None,
            attempts: Vec::new(),
            error: Some(CallError::AuthRequired),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == CallStatus::Ok
    }

    /// Status code to answer the gateway's own caller with.
    pub fn status_code(&self) -> u16 {
        match &self.error {
            Some(error) => error.status_code(),
            None => self.http_status.unwrap_or(200),
        }
    }

    pub fn into_result(self) -> crate::Result<ResponseBody> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self
                .body
                .unwrap_or(ResponseBody::Structured(Value::Null))),
        }
    }
}
