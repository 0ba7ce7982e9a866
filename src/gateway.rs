use reqwest::header::{self, HeaderMap};

use crate::{
    CallResult, ConfigError, OutboundRequest, ReqwestTransport, RetryPolicy, RetryingCaller,
    Transport,
};

/// Joins an upstream base URL and a route path.
///
/// Example: `("https://api.test/", "/v1/items")` → `"https://api.test/v1/items"`
pub fn route_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Forwards inbound requests to one upstream service.
///
/// The inbound `Authorization` header is forwarded unchanged. When it is
/// required and missing, no outbound call is made and the result maps to 401.
#[derive(Clone, Debug)]
pub struct GatewayClient<T: Transport = ReqwestTransport> {
    caller: RetryingCaller<T>,
    base_url: String,
    policy: RetryPolicy,
    require_auth: bool,
}

impl GatewayClient<ReqwestTransport> {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_caller(RetryingCaller::new(), base_url)
    }

    /// Creates a client from environment variables.
    ///
    /// Reads `RESILIENT_HTTP_BASE_URL` for the upstream and the
    /// `RESILIENT_HTTP_*` retry variables described on
    /// [`RetryPolicy::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let base_url = lookup("RESILIENT_HTTP_BASE_URL")
            .ok_or(ConfigError::Missing("RESILIENT_HTTP_BASE_URL"))?;
        if base_url.trim().is_empty() {
            return Err(ConfigError::Empty {
                name: "RESILIENT_HTTP_BASE_URL",
            });
        }
        let policy = RetryPolicy::from_lookup(lookup)?;
        Ok(Self::new(base_url).with_policy(policy))
    }
}

impl<T: Transport> GatewayClient<T> {
    pub fn with_caller(caller: RetryingCaller<T>, base_url: impl Into<String>) -> Self {
        Self {
            caller,
            base_url: base_url.into(),
            policy: RetryPolicy::default(),
            require_auth: true,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Forwards requests that carry no authorization value.
    pub fn allow_anonymous(mut self) -> Self {
        self.require_auth = false;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Forwards `request` to the upstream.
    ///
    /// `request.url` is a path relative to the base URL. Its authorization
    /// value is taken from `inbound`.
    pub async fn forward(&self, inbound: &HeaderMap, mut request: OutboundRequest) -> CallResult {
        request.authorization = inbound_authorization(inbound);
        if self.require_auth && request.authorization.is_none() {
            #[cfg(feature = "tracing")]
            tracing::debug!(path = %request.url, "rejecting request without authorization");
            return CallResult::auth_required();
        }

        if request.body.is_some() && !request.headers.contains_key(header::CONTENT_TYPE) {
            if let Some(content_type) = inbound.get(header::CONTENT_TYPE) {
                request
                    .headers
                    .insert(header::CONTENT_TYPE, content_type.clone());
            }
        }
        request.url = route_url(&self.base_url, &request.url);

        self.caller.call(&request, &self.policy).await
    }
}

fn inbound_authorization(inbound: &HeaderMap) -> Option<String> {
    inbound
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use reqwest::header::{self, HeaderMap, HeaderValue};

    use super::{inbound_authorization, route_url, GatewayClient};
    use crate::{CallError, ConfigError, OutboundRequest, RetryPolicy};

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> = vars
            .iter()
            .map(|(name, value)| (*name, (*value).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn from_env_reads_base_url_and_policy() {
        let gateway = GatewayClient::from_lookup(lookup(&[
            ("RESILIENT_HTTP_BASE_URL", "https://api.test"),
            ("RESILIENT_HTTP_MAX_RETRIES", "4"),
        ]))
        .expect("must build");

        assert_eq!(gateway.base_url, "https://api.test");
        assert_eq!(gateway.policy().max_retries, 4);
        assert_eq!(
            gateway.policy().retry_statuses,
            RetryPolicy::default().retry_statuses
        );
    }

    #[test]
    fn from_env_requires_non_empty_base_url() {
        assert_eq!(
            GatewayClient::from_lookup(lookup(&[])).err(),
            Some(ConfigError::Missing("RESILIENT_HTTP_BASE_URL"))
        );
        assert_eq!(
            GatewayClient::from_lookup(lookup(&[("RESILIENT_HTTP_BASE_URL", "  ")])).err(),
            Some(ConfigError::Empty {
                name: "RESILIENT_HTTP_BASE_URL"
            })
        );
        assert!(matches!(
            GatewayClient::from_lookup(lookup(&[
                ("RESILIENT_HTTP_BASE_URL", "https://api.test"),
                ("RESILIENT_HTTP_TIMEOUT_MS", "soon"),
            ])),
            Err(ConfigError::Invalid { name: "RESILIENT_HTTP_TIMEOUT_MS", .. })
        ));
    }

    #[test]
    fn route_url_joins_slashes() {
        assert_eq!(
            route_url("https://api.test/", "/v1/items"),
            "https://api.test/v1/items"
        );
        assert_eq!(route_url("https://api.test", "v1"), "https://api.test/v1");
    }

    #[test]
    fn blank_authorization_counts_as_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("   "));
        assert_eq!(inbound_authorization(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert_eq!(inbound_authorization(&headers).as_deref(), Some("Token abc"));
    }

    #[tokio::test]
    async fn missing_authorization_short_circuits() {
        let gateway = GatewayClient::new("http://127.0.0.1:9");
        let result = gateway
            .forward(&HeaderMap::new(), OutboundRequest::get("/v1/items"))
            .await;

        assert_eq!(result.status_code(), 401);
        assert_eq!(result.error, Some(CallError::AuthRequired));
        assert!(result.attempts.is_empty());
    }
}
