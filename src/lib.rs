//! `resilient-http` provides cancelable, time-bounded async call primitives
//! for gateway backends:
//! - [`RetryingCaller::call`]: one outbound call with per-attempt timeout,
//!   bounded retries and backoff, normalized into a [`CallResult`]
//! - [`transcode`]: classification of a completed response into a
//!   [`ResponseBody`] or a [`TranscodeError`]
//! - [`DebouncedValidator`]: quiet-period gated remote validation with
//!   last-write-wins delivery
//! - [`GatewayClient::forward`]: authorization pass-through on top of the caller

mod caller;
mod error;
mod gateway;
mod options;
mod remote;
mod timer;
mod transcode;
mod transport;
mod types;
mod validator;

pub use caller::RetryingCaller;
pub use error::{CallError, ConfigError, TranscodeError, TransportError, ValidationError};
pub use gateway::{route_url, GatewayClient};
pub use options::{Backoff, RetryPolicy, TranscodeOptions, ValidatorOptions};
pub use remote::HttpValidationService;
pub use timer::{CancelableTimer, CancellationToken, TokenState, DEADLINE_ELAPSED};
pub use transcode::transcode;
pub use transport::{OutboundRequest, RawResponse, ReqwestTransport, ResponseExpectation, Transport};
pub use types::{
    AttemptOutcome, BinaryPayload, CallAttempt, CallResult, CallStatus, DispositionMode,
    RedirectTarget, ResponseBody,
};
pub use validator::{
    Availability, DebouncedValidator, FieldKind, Submission, ValidationOutcome, ValidationRequest,
    ValidationService, ValidatorState,
};

pub type Result<T> = std::result::Result<T, CallError>;
