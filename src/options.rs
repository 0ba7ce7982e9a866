use std::time::Duration;

use serde::Deserialize;

use crate::ConfigError;

/// Delay function applied between attempts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base` before every retry.
    Constant,
    /// `base * (attempt + 1)`.
    #[default]
    Linear,
    /// `base * 2^attempt`, with the exponent capped at 16.
    Exponential,
}

impl Backoff {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "constant" => Some(Self::Constant),
            "linear" => Some(Self::Linear),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }
}

/// Configures per-attempt timeout and retry behavior of a
/// [`RetryingCaller`](crate::RetryingCaller).
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Per-attempt timeout in milliseconds.
    pub per_attempt_timeout_ms: u64,
    /// Base retry backoff in milliseconds.
    pub backoff_base_ms: u64,
    pub backoff: Backoff,
    /// Upstream status codes treated as transient. Only 5xx codes listed
    /// here take effect; anything below 500 is never retried.
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            per_attempt_timeout_ms: 10_000,
            backoff_base_ms: 250,
            backoff: Backoff::Linear,
            retry_statuses: vec![500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    /// Reads overrides from `RESILIENT_HTTP_*` environment variables.
    ///
    /// Recognized variables:
    /// - `RESILIENT_HTTP_MAX_RETRIES`
    /// - `RESILIENT_HTTP_TIMEOUT_MS`
    /// - `RESILIENT_HTTP_BACKOFF_MS`
    /// - `RESILIENT_HTTP_BACKOFF` (`constant`, `linear` or `exponential`)
    /// - `RESILIENT_HTTP_RETRY_STATUSES` (comma separated, e.g. `502,503`)
    ///
    /// Unset variables keep their [`Default`] value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut policy = Self::default();
        if let Some(value) = read_var(&lookup, "RESILIENT_HTTP_MAX_RETRIES")? {
            policy.max_retries = parse_number("RESILIENT_HTTP_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_var(&lookup, "RESILIENT_HTTP_TIMEOUT_MS")? {
            policy.per_attempt_timeout_ms = parse_number("RESILIENT_HTTP_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_var(&lookup, "RESILIENT_HTTP_BACKOFF_MS")? {
            policy.backoff_base_ms = parse_number("RESILIENT_HTTP_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read_var(&lookup, "RESILIENT_HTTP_BACKOFF")? {
            policy.backoff = Backoff::parse(&value).ok_or(ConfigError::Invalid {
                name: "RESILIENT_HTTP_BACKOFF",
                value: value.clone(),
            })?;
        }
        if let Some(value) = read_var(&lookup, "RESILIENT_HTTP_RETRY_STATUSES")? {
            policy.retry_statuses = value
                .split(',')
                .map(|code| parse_number("RESILIENT_HTTP_RETRY_STATUSES", code))
                .collect::<Result<Vec<u16>, _>>()?;
        }
        Ok(policy)
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff, base: Duration) -> Self {
        self.backoff = backoff;
        self.backoff_base_ms = duration_ms(base);
        self
    }

    pub fn with_retry_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_statuses = statuses.into_iter().collect();
        self
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.per_attempt_timeout_ms)
    }

    /// Delay to wait after the failed attempt `attempt_index`.
    pub fn backoff_delay(&self, attempt_index: usize) -> Duration {
        let base = self.backoff_base_ms;
        let delay_ms = match self.backoff {
            Backoff::Constant => base,
            Backoff::Linear => base.saturating_mul(attempt_index as u64 + 1),
            Backoff::Exponential => {
                let exp = attempt_index.min(16) as u32;
                base.saturating_mul(1u64 << exp)
            }
        };
        Duration::from_millis(delay_ms)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        status >= 500 && self.retry_statuses.contains(&status)
    }
}

/// Controls how [`transcode`](crate::transcode) classifies response bodies.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct TranscodeOptions {
    /// Media types answered as [`BinaryPayload`](crate::BinaryPayload) when
    /// streaming is requested. Entries ending in `*` match by prefix.
    pub binary_types: Vec<String>,
    /// Top-level JSON fields that turn a structured body into a
    /// [`RedirectTarget`](crate::RedirectTarget).
    pub locator_fields: Vec<String>,
    /// Maximum number of body bytes kept in a malformed-body preview.
    pub preview_limit: usize,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            binary_types: [
                "application/pdf",
                "application/octet-stream",
                "application/zip",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.*",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            locator_fields: [
                "download_url",
                "downloadUrl",
                "signed_url",
                "signedUrl",
                "redirect_url",
                "redirectUrl",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            preview_limit: 256,
        }
    }
}

/// Configures a [`DebouncedValidator`](crate::DebouncedValidator).
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct ValidatorOptions {
    /// Quiet period in milliseconds after the last submit.
    pub debounce_ms: u64,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl ValidatorOptions {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn read_var<F>(lookup: &F, name: &'static str) -> Result<Option<String>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Err(ConfigError::Empty { name }),
        Some(value) => Ok(Some(value)),
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use super::{Backoff, RetryPolicy, TranscodeOptions};
    use crate::ConfigError;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> = vars
            .iter()
            .map(|(name, value)| (*name, (*value).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn linear_backoff_is_non_decreasing() {
        let policy = RetryPolicy::default().with_backoff(Backoff::Linear, Duration::from_millis(100));
        let delays: Vec<Duration> = (0..6).map(|i| policy.backoff_delay(i)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[2], Duration::from_millis(300));
    }

    #[test]
    fn exponential_backoff_caps_exponent() {
        let policy =
            RetryPolicy::default().with_backoff(Backoff::Exponential, Duration::from_millis(1));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(8));
        assert_eq!(policy.backoff_delay(40), policy.backoff_delay(16));
    }

    #[test]
    fn client_error_codes_are_never_retryable() {
        let policy = RetryPolicy::default().with_retry_statuses([429, 503]);
        assert!(!policy.is_retryable_status(429));
        assert!(policy.is_retryable_status(503));
        assert!(!policy.is_retryable_status(500));
    }

    #[test]
    fn codes_below_500_are_never_retryable() {
        let policy = RetryPolicy::default().with_retry_statuses([200, 302, 503]);
        assert!(!policy.is_retryable_status(200));
        assert!(!policy.is_retryable_status(302));
        assert!(policy.is_retryable_status(503));
    }

    #[test]
    fn env_overrides_defaults() {
        let policy = RetryPolicy::from_lookup(lookup(&[
            ("RESILIENT_HTTP_MAX_RETRIES", "5"),
            ("RESILIENT_HTTP_BACKOFF", "Exponential"),
            ("RESILIENT_HTTP_RETRY_STATUSES", "502, 503"),
        ]))
        .expect("must parse");

        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff, Backoff::Exponential);
        assert_eq!(policy.retry_statuses, vec![502, 503]);
        assert_eq!(policy.per_attempt_timeout_ms, 10_000);
    }

    #[test]
    fn env_rejects_empty_and_invalid_values() {
        let err = RetryPolicy::from_lookup(lookup(&[("RESILIENT_HTTP_TIMEOUT_MS", " ")]))
            .expect_err("must fail");
        assert_eq!(
            err,
            ConfigError::Empty {
                name: "RESILIENT_HTTP_TIMEOUT_MS"
            }
        );

        let err = RetryPolicy::from_lookup(lookup(&[("RESILIENT_HTTP_BACKOFF", "fibonacci")]))
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_retries": 1, "backoff": "constant"}"#).expect("json");
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.backoff, Backoff::Constant);
        assert_eq!(policy.backoff_base_ms, 250);

        let opts: TranscodeOptions = serde_json::from_str(r#"{"preview_limit": 8}"#).expect("json");
        assert_eq!(opts.preview_limit, 8);
        assert!(!opts.locator_fields.is_empty());
    }
}
