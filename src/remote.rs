use std::fmt;

use reqwest::Url;

use crate::{
    Availability, CallError, FieldKind, OutboundRequest, ReqwestTransport, ResponseBody,
    RetryPolicy, RetryingCaller, Transport, ValidationError, ValidationService,
};

/// [`ValidationService`] that queries `GET <base>/validate/<kind>?value=<v>`
/// through a [`RetryingCaller`] and expects `{"available": bool, "reason"?: string}`.
pub struct HttpValidationService<T: Transport = ReqwestTransport> {
    caller: RetryingCaller<T>,
    policy: RetryPolicy,
    base_url: String,
    authorization: Option<String>,
}

impl<T: Transport> fmt::Debug for HttpValidationService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpValidationService")
            .field("base_url", &self.base_url)
            .field("policy", &self.policy)
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl HttpValidationService<ReqwestTransport> {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_caller(RetryingCaller::new(), base_url)
    }
}

impl<T: Transport> HttpValidationService<T> {
    pub fn with_caller(caller: RetryingCaller<T>, base_url: impl Into<String>) -> Self {
        Self {
            caller,
            policy: RetryPolicy::default(),
            base_url: base_url.into(),
            authorization: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Authorization value forwarded verbatim on every check.
    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    fn check_url(&self, kind: FieldKind, value: &str) -> Result<Url, ValidationError> {
        let endpoint = format!(
            "{}/validate/{}",
            self.base_url.trim_end_matches('/'),
            kind.as_str()
        );
        Url::parse_with_params(&endpoint, &[("value", value)])
            .map_err(|err| ValidationError::Unavailable(format!("invalid url '{endpoint}': {err}")))
    }
}

impl<T: Transport + 'static> ValidationService for HttpValidationService<T> {
    async fn validate(&self, kind: FieldKind, value: &str) -> Result<Availability, ValidationError> {
        let url = self.check_url(kind, value)?;
        let mut request = OutboundRequest::get(url.as_str());
        request.authorization = self.authorization.clone();

        let body = self
            .caller
            .call(&request, &self.policy)
            .await
            .into_result()
            .map_err(|err| match err {
                CallError::Transcode { preview } => ValidationError::InvalidResponse(preview),
                other => ValidationError::Unavailable(other.to_string()),
            })?;

        match body {
            ResponseBody::Structured(value) => serde_json::from_value(value)
                .map_err(|err| ValidationError::InvalidResponse(err.to_string())),
            other => Err(ValidationError::InvalidResponse(format!(
                "unexpected response shape: {other:?}"
            ))),
        }
    }
}
