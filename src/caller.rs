use std::{sync::Arc, time::Instant};

use tokio::time::sleep;

use crate::{
    transcode, AttemptOutcome, CallAttempt, CallError, CallResult, CallStatus, CancelableTimer,
    OutboundRequest, RawResponse, ReqwestTransport, ResponseBody, ResponseExpectation,
    RetryPolicy, TranscodeOptions, Transport, TransportError,
};

/// Runs one outbound call with a per-attempt timeout and bounded retries.
///
/// Holds no state across calls; clones share the transport and can be used
/// from any number of call sites at once.
#[derive(Debug)]
pub struct RetryingCaller<T = ReqwestTransport> {
    transport: Arc<T>,
    timer: CancelableTimer,
    transcode: TranscodeOptions,
}

impl<T> Clone for RetryingCaller<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            timer: self.timer,
            transcode: self.transcode.clone(),
        }
    }
}

impl Default for RetryingCaller<ReqwestTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryingCaller<ReqwestTransport> {
    pub fn new() -> Self {
        Self::with_transport(ReqwestTransport::new())
    }
}

/// How a single attempt ended, before retry eligibility is applied.
enum Exchange {
    Completed(Result<RawResponse, TransportError>),
    TimedOut,
}

/// Failure that may be retried.
enum Transient {
    Status(RawResponse),
    Network(String),
}

enum Step {
    Done(CallResult),
    Retry(Transient),
}

impl<T: Transport> RetryingCaller<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            timer: CancelableTimer::new(),
            transcode: TranscodeOptions::default(),
        }
    }

    pub fn with_transcode_options(mut self, options: TranscodeOptions) -> Self {
        self.transcode = options;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Issues `request` until it succeeds, fails fatally, or `policy` runs
    /// out of retries. Always produces exactly one [`CallResult`].
    pub async fn call(&self, request: &OutboundRequest, policy: &RetryPolicy) -> CallResult {
        let mut attempts = Vec::new();
        let mut attempt_index = 0usize;
        let mut last_status = None;

        loop {
            let timeout = policy.per_attempt_timeout();
            let mut attempt = CallAttempt {
                attempt_index,
                deadline: Instant::now() + timeout,
                outcome: AttemptOutcome::Pending,
                http_status: None,
                detail: None,
            };

            let token = self.timer.arm(timeout);
            let exchange = tokio::select! {
                biased;
                _ = token.cancelled() => Exchange::TimedOut,
                result = self.transport.send(request, token.clone()) => {
                    // Losing the disarm race means the deadline fired first.
                    if self.timer.disarm(&token) {
                        Exchange::Completed(result)
                    } else {
                        Exchange::TimedOut
                    }
                }
            };

            if let Exchange::Completed(Ok(raw)) = &exchange {
                attempt.http_status = Some(raw.status);
                last_status = Some(raw.status);
            }

            let step = match exchange {
                Exchange::TimedOut => {
                    let message = format!(
                        "attempt {attempt_index} timed out after {} ms",
                        policy.per_attempt_timeout_ms
                    );
                    #[cfg(feature = "tracing")]
                    tracing::debug!(url = %request.url, attempt_index, "{message}");
                    Step::Retry(Transient::Network(message))
                }
                Exchange::Completed(Err(err)) => {
                    if is_transient_transport(&err) {
                        Step::Retry(Transient::Network(err.to_string()))
                    } else {
                        attempt.outcome = AttemptOutcome::FatalFailure;
                        attempt.detail = Some(err.to_string());
                        attempts.push(attempt);
                        return network_failure(err.to_string(), last_status, attempts);
                    }
                }
                Exchange::Completed(Ok(raw)) => self.classify(raw, request, policy, &mut attempt),
            };

            let transient = match step {
                Step::Done(mut result) => {
                    attempts.push(attempt);
                    result.attempts = attempts;
                    return result;
                }
                Step::Retry(transient) => transient,
            };

            attempt.outcome = AttemptOutcome::TransientFailure;
            if let Transient::Network(message) = &transient {
                attempt.detail = Some(message.clone());
            }
            attempts.push(attempt);

            if attempt_index >= policy.max_retries {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    url = %request.url,
                    attempts = attempts.len(),
                    "retries exhausted"
                );
                return match transient {
                    Transient::Status(raw) => self.server_error(raw, attempts),
                    Transient::Network(message) => network_failure(message, last_status, attempts),
                };
            }

            let delay = policy.backoff_delay(attempt_index);
            #[cfg(feature = "tracing")]
            tracing::debug!(
                url = %request.url,
                attempt_index,
                delay_ms = delay.as_millis() as u64,
                "retrying outbound call"
            );
            sleep(delay).await;
            attempt_index += 1;
        }
    }

    fn classify(
        &self,
        raw: RawResponse,
        request: &OutboundRequest,
        policy: &RetryPolicy,
        attempt: &mut CallAttempt,
    ) -> Step {
        let status = raw.status;
        if (400..500).contains(&status) {
            attempt.outcome = AttemptOutcome::FatalFailure;
            return Step::Done(CallResult {
                status: CallStatus::ClientError,
                http_status: Some(status),
                body: Some(self.transcode_error_body(&raw)),
                attempts: Vec::new(),
                error: Some(CallError::Client { status }),
            });
        }
        if policy.is_retryable_status(status) {
            return Step::Retry(Transient::Status(raw));
        }
        if status >= 500 {
            attempt.outcome = AttemptOutcome::FatalFailure;
            return Step::Done(self.server_error(raw, Vec::new()));
        }

        match transcode(&raw, &request.expectation, &self.transcode) {
            Ok(body) => {
                attempt.outcome = AttemptOutcome::Success;
                Step::Done(CallResult {
                    status: CallStatus::Ok,
                    http_status: Some(status),
                    body: Some(body),
                    attempts: Vec::new(),
                    error: None,
                })
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(status, "response body could not be transcoded");
                attempt.outcome = AttemptOutcome::FatalFailure;
                Step::Done(CallResult {
                    status: CallStatus::InternalError,
                    http_status: Some(status),
                    body: Some(ResponseBody::Malformed {
                        preview: err.preview.clone(),
                    }),
                    attempts: Vec::new(),
                    error: Some(err.into()),
                })
            }
        }
    }

    /// Error bodies are never streamed, whatever the request expected.
    fn transcode_error_body(&self, raw: &RawResponse) -> ResponseBody {
        transcode(raw, &ResponseExpectation::default(), &self.transcode)
            .unwrap_or_else(|err| ResponseBody::Malformed {
                preview: err.preview,
            })
    }

    fn server_error(&self, raw: RawResponse, attempts: Vec<CallAttempt>) -> CallResult {
        let status = raw.status;
        CallResult {
            status: CallStatus::ServerError,
            http_status: Some(status),
            body: Some(self.transcode_error_body(&raw)),
            attempts,
            error: Some(CallError::Server { status }),
        }
    }
}

fn network_failure(
    message: String,
    last_status: Option<u16>,
    attempts: Vec<CallAttempt>,
) -> CallResult {
    CallResult {
        status: CallStatus::NetworkFailure,
        http_status: last_status,
        body: None,
        attempts,
        error: Some(CallError::Network(message)),
    }
}

fn is_transient_transport(err: &TransportError) -> bool {
    match err {
        TransportError::Request(err) => {
            err.is_timeout() || err.is_request() || err.is_body() || err.is_connect()
        }
        TransportError::Connection(_) | TransportError::Cancelled => true,
    }
}
