//! Debounced remote validation for a single input field.
//!
//! Every submit gets the next sequence number. Only the last submit of a
//! burst reaches the remote service, and an outcome is delivered only while
//! its sequence number is still the latest one issued.

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use serde::Deserialize;

use crate::{CancelableTimer, CancellationToken, TokenState, ValidationError, ValidatorOptions};

/// Kind of identifier being validated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum FieldKind {
    /// Account, wallet or handle style address.
    Address,
    /// Email address or phone number.
    Contact,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Contact => "contact",
        }
    }

    /// Cheap local format check run before the debounce window.
    pub fn precheck(self, value: &str) -> Result<(), String> {
        if value.trim().is_empty() {
            return Err(format!("{} is required", self.as_str()));
        }
        if value.trim().len() != value.len() {
            return Err(format!("{} must not start or end with whitespace", self.as_str()));
        }
        match self {
            Self::Address => check_address(value),
            Self::Contact => check_contact(value),
        }
    }
}

fn check_address(value: &str) -> Result<(), String> {
    if let Some(ch) = value
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | ':')))
    {
        if ch.is_whitespace() {
            return Err("address must not contain whitespace".to_owned());
        }
        return Err(format!("address contains invalid character '{ch}'"));
    }
    Ok(())
}

fn check_contact(value: &str) -> Result<(), String> {
    if let Some((local, domain)) = value.split_once('@') {
        let labels_ok = !domain.contains('@')
            && domain.contains('.')
            && domain.split('.').all(|label| !label.is_empty());
        if !local.is_empty() && labels_ok && !value.chars().any(char::is_whitespace) {
            return Ok(());
        }
        return Err("contact is not a valid email address".to_owned());
    }

    let digits = value.strip_prefix('+').unwrap_or(value);
    let digits: String = digits.chars().filter(|ch| !matches!(ch, ' ' | '-')).collect();
    if digits.chars().all(|ch| ch.is_ascii_digit()) && (7..=15).contains(&digits.len()) {
        Ok(())
    } else {
        Err("contact must be an email address or phone number".to_owned())
    }
}

/// Availability report returned by the remote validation service.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct Availability {
    pub available: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Remote validation service.
pub trait ValidationService: Send + Sync + 'static {
    fn validate(
        &self,
        kind: FieldKind,
        value: &str,
    ) -> impl Future<Output = Result<Availability, ValidationError>> + Send;
}

impl<S: ValidationService> ValidationService for Arc<S> {
    fn validate(
        &self,
        kind: FieldKind,
        value: &str,
    ) -> impl Future<Output = Result<Availability, ValidationError>> + Send {
        (**self).validate(kind, value)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationRequest {
    pub input_value: String,
    pub sequence_number: u64,
    pub submitted_at: Instant,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationOutcome {
    pub sequence_number: u64,
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationOutcome {
    fn from_service(sequence_number: u64, result: Result<Availability, ValidationError>) -> Self {
        match result {
            Ok(Availability {
                available: true, ..
            }) => Self {
                sequence_number,
                is_valid: true,
                error: None,
            },
            Ok(Availability { reason, .. }) => Self {
                sequence_number,
                is_valid: false,
                error: Some(reason.unwrap_or_else(|| "not available".to_owned())),
            },
            Err(err) => Self {
                sequence_number,
                is_valid: false,
                error: Some(err.to_string()),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidatorState {
    Idle,
    /// A quiet-period timer is armed.
    Waiting,
    /// The remote call for the latest submit is running.
    InFlight,
}

/// Result of [`DebouncedValidator::submit`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Submission {
    /// The value will be checked remotely once the quiet period elapses.
    Scheduled { sequence_number: u64 },
    /// The local pre-check rejected the value; the outcome was also
    /// delivered to the observer.
    Rejected(ValidationOutcome),
}

type Observer = Arc<dyn Fn(ValidationOutcome) + Send + Sync>;
type Precheck = Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>;

struct Inner {
    state: ValidatorState,
    latest: u64,
    pending: Option<ValidationRequest>,
    quiet_timer: Option<CancellationToken>,
    in_flight: Option<(u64, CancellationToken)>,
}

impl Inner {
    fn abandon(&mut self, timer: &CancelableTimer, reason: &str) {
        if let Some(token) = self.quiet_timer.take() {
            timer.disarm(&token);
        }
        if let Some((_, token)) = self.in_flight.take() {
            token.cancel(reason);
        }
        self.pending = None;
    }
}

struct Shared<S> {
    service: S,
    kind: FieldKind,
    timer: CancelableTimer,
    inner: Mutex<Inner>,
    observer: Mutex<Option<Observer>>,
}

impl<S: ValidationService> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, outcome: ValidationOutcome) {
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer(outcome);
        }
    }

    async fn run(self: Arc<Self>, sequence_number: u64, quiet_timer: CancellationToken) {
        if quiet_timer.settled().await != TokenState::Fired {
            return;
        }

        let (value, call_token) = {
            let mut inner = self.lock();
            let current = inner.state == ValidatorState::Waiting
                && inner.latest == sequence_number
                && inner
                    .quiet_timer
                    .as_ref()
                    .is_some_and(|token| token.same_token(&quiet_timer));
            if !current {
                return;
            }
            let Some(request) = inner.pending.take() else {
                return;
            };
            let call_token = CancellationToken::new();
            inner.quiet_timer = None;
            inner.in_flight = Some((sequence_number, call_token.clone()));
            inner.state = ValidatorState::InFlight;
            (request.input_value, call_token)
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            kind = self.kind.as_str(),
            sequence_number,
            "issuing remote validation"
        );

        let result = tokio::select! {
            biased;
            _ = call_token.cancelled() => None,
            result = self.service.validate(self.kind, &value) => Some(result),
        };

        let outcome = {
            let mut inner = self.lock();
            let current = inner.latest == sequence_number
                && !call_token.is_cancelled()
                && inner
                    .in_flight
                    .as_ref()
                    .is_some_and(|(seq, token)| {
                        *seq == sequence_number && token.same_token(&call_token)
                    });
            match result {
                Some(result) if current => {
                    inner.in_flight = None;
                    inner.state = ValidatorState::Idle;
                    ValidationOutcome::from_service(sequence_number, result)
                }
                _ => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        kind = self.kind.as_str(),
                        sequence_number,
                        latest = inner.latest,
                        "discarding stale validation outcome"
                    );
                    return;
                }
            }
        };
        self.deliver(outcome);
    }
}

/// Collapses bursts of input into one remote check per quiet period.
///
/// Must be used from within a tokio runtime. Dropping the validator cancels
/// any pending or running check.
pub struct DebouncedValidator<S: ValidationService> {
    shared: Arc<Shared<S>>,
    window: Duration,
    precheck: Option<Precheck>,
}

impl<S: ValidationService> fmt::Debug for DebouncedValidator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("DebouncedValidator")
            .field("kind", &self.shared.kind)
            .field("window", &self.window)
            .field("state", &inner.state)
            .field("latest", &inner.latest)
            .finish()
    }
}

impl<S: ValidationService> DebouncedValidator<S> {
    /// Creates a validator using the built-in pre-check for `kind`.
    pub fn new(service: S, kind: FieldKind, options: ValidatorOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                service,
                kind,
                timer: CancelableTimer::new(),
                inner: Mutex::new(Inner {
                    state: ValidatorState::Idle,
                    latest: 0,
                    pending: None,
                    quiet_timer: None,
                    in_flight: None,
                }),
                observer: Mutex::new(None),
            }),
            window: options.debounce_window(),
            precheck: Some(Arc::new(move |value: &str| kind.precheck(value))),
        }
    }

    /// Replaces the local pre-check.
    pub fn with_precheck<F>(mut self, precheck: F) -> Self
    where
        F: Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    {
        self.precheck = Some(Arc::new(precheck));
        self
    }

    /// Sends every value to the remote service.
    pub fn without_precheck(mut self) -> Self {
        self.precheck = None;
        self
    }

    /// Registers the observer that receives delivered outcomes, replacing
    /// any previous one.
    pub fn on_outcome<F>(&self, handler: F)
    where
        F: Fn(ValidationOutcome) + Send + Sync + 'static,
    {
        *self
            .shared
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn submit(&self, value: impl Into<String>) -> Submission {
        let request = {
            let mut inner = self.shared.lock();
            inner.latest += 1;
            inner.abandon(&self.shared.timer, "superseded");
            ValidationRequest {
                input_value: value.into(),
                sequence_number: inner.latest,
                submitted_at: Instant::now(),
            }
        };
        let sequence_number = request.sequence_number;

        if let Some(Err(reason)) = self
            .precheck
            .as_ref()
            .map(|precheck| precheck(&request.input_value))
        {
            let outcome = ValidationOutcome {
                sequence_number,
                is_valid: false,
                error: Some(reason),
            };
            {
                let mut inner = self.shared.lock();
                if inner.latest != sequence_number {
                    return Submission::Rejected(outcome);
                }
                inner.state = ValidatorState::Idle;
            }
            self.shared.deliver(outcome.clone());
            return Submission::Rejected(outcome);
        }

        let quiet_timer = {
            let mut inner = self.shared.lock();
            if inner.latest != sequence_number {
                return Submission::Scheduled { sequence_number };
            }
            let token = self.shared.timer.arm(self.window);
            inner.quiet_timer = Some(token.clone());
            inner.pending = Some(request);
            inner.state = ValidatorState::Waiting;
            token
        };

        tokio::spawn(Arc::clone(&self.shared).run(sequence_number, quiet_timer));
        Submission::Scheduled { sequence_number }
    }

    /// Drops pending and running work. No outcome is delivered for it.
    pub fn cancel(&self) {
        let mut inner = self.shared.lock();
        inner.abandon(&self.shared.timer, "cancelled");
        inner.state = ValidatorState::Idle;
    }

    pub fn state(&self) -> ValidatorState {
        self.shared.lock().state
    }

    /// Highest sequence number issued so far.
    pub fn current_sequence(&self) -> u64 {
        self.shared.lock().latest
    }

    pub fn kind(&self) -> FieldKind {
        self.shared.kind
    }
}

impl<S: ValidationService> Drop for DebouncedValidator<S> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use tokio::time::sleep;

    use super::{
        Availability, DebouncedValidator, FieldKind, Submission, ValidationOutcome,
        ValidationService, ValidatorState,
    };
    use crate::{ValidationError, ValidatorOptions};

    #[derive(Default)]
    struct RecordingService {
        calls: Mutex<Vec<String>>,
        delay: Duration,
        taken: Vec<String>,
        fail: bool,
    }

    impl RecordingService {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls mutex").clone()
        }
    }

    impl ValidationService for RecordingService {
        async fn validate(
            &self,
            _kind: FieldKind,
            value: &str,
        ) -> Result<Availability, ValidationError> {
            self.calls.lock().expect("calls mutex").push(value.to_owned());
            sleep(self.delay).await;
            if self.fail {
                return Err(ValidationError::Unavailable("upstream down".to_owned()));
            }
            let taken = self.taken.iter().any(|taken| taken == value);
            Ok(Availability {
                available: !taken,
                reason: taken.then(|| "already registered".to_owned()),
            })
        }
    }

    type Delivered = Arc<Mutex<Vec<ValidationOutcome>>>;

    fn observed(
        service: Arc<RecordingService>,
    ) -> (DebouncedValidator<Arc<RecordingService>>, Delivered) {
        let validator =
            DebouncedValidator::new(service, FieldKind::Address, ValidatorOptions::default());
        let delivered: Delivered = Arc::default();
        let sink = Arc::clone(&delivered);
        validator.on_outcome(move |outcome| sink.lock().expect("sink mutex").push(outcome));
        (validator, delivered)
    }

    fn delivered(sink: &Delivered) -> Vec<ValidationOutcome> {
        sink.lock().expect("sink mutex").clone()
    }

    #[tokio::test(start_paused = true)]
    async fn burst_issues_one_call_with_last_value() {
        let service = Arc::new(RecordingService::with_delay(Duration::from_millis(20)));
        let (validator, sink) = observed(Arc::clone(&service));

        validator.submit("acct-1");
        sleep(Duration::from_millis(100)).await;
        validator.submit("acct-12");
        sleep(Duration::from_millis(100)).await;
        assert_eq!(
            validator.submit("acct-123"),
            Submission::Scheduled { sequence_number: 3 }
        );
        assert_eq!(validator.state(), ValidatorState::Waiting);

        sleep(Duration::from_millis(1_000)).await;

        assert_eq!(service.calls(), vec!["acct-123".to_owned()]);
        assert_eq!(
            delivered(&sink),
            vec![ValidationOutcome {
                sequence_number: 3,
                is_valid: true,
                error: None
            }]
        );
        assert_eq!(validator.state(), ValidatorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn state_moves_through_in_flight() {
        let service = Arc::new(RecordingService::with_delay(Duration::from_millis(200)));
        let (validator, sink) = observed(Arc::clone(&service));

        validator.submit("acct-9");
        sleep(Duration::from_millis(600)).await;
        assert_eq!(validator.state(), ValidatorState::InFlight);
        assert!(delivered(&sink).is_empty());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(validator.state(), ValidatorState::Idle);
        assert_eq!(delivered(&sink).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn outcome_superseded_by_later_submit_is_discarded() {
        let service = Arc::new(RecordingService::with_delay(Duration::from_millis(300)));
        let (validator, sink) = observed(Arc::clone(&service));

        validator.submit("first");
        sleep(Duration::from_millis(600)).await;
        assert_eq!(validator.state(), ValidatorState::InFlight);

        validator.submit("second");
        sleep(Duration::from_millis(2_000)).await;

        assert_eq!(service.calls(), vec!["first".to_owned(), "second".to_owned()]);
        let outcomes = delivered(&sink);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].sequence_number, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_in_flight_then_submit_discards_original() {
        let service = Arc::new(RecordingService::with_delay(Duration::from_millis(300)));
        let (validator, sink) = observed(Arc::clone(&service));

        validator.submit("first");
        sleep(Duration::from_millis(600)).await;
        validator.cancel();
        assert_eq!(validator.state(), ValidatorState::Idle);

        validator.submit("second");
        sleep(Duration::from_millis(2_000)).await;

        let outcomes = delivered(&sink);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].sequence_number, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_waiting_issues_nothing() {
        let service = Arc::new(RecordingService::default());
        let (validator, sink) = observed(Arc::clone(&service));

        validator.submit("acct-1");
        validator.cancel();
        sleep(Duration::from_millis(1_000)).await;

        assert!(service.calls().is_empty());
        assert!(delivered(&sink).is_empty());
        assert_eq!(validator.state(), ValidatorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn precheck_rejects_synchronously_without_remote_call() {
        let service = Arc::new(RecordingService::default());
        let (validator, sink) = observed(Arc::clone(&service));

        validator.submit("acct-1");
        let submission = validator.submit("bad value");

        let Submission::Rejected(outcome) = submission else {
            panic!("expected rejection, got {submission:?}");
        };
        assert_eq!(outcome.sequence_number, 2);
        assert!(!outcome.is_valid);
        assert_eq!(delivered(&sink), vec![outcome]);
        assert_eq!(validator.state(), ValidatorState::Idle);

        sleep(Duration::from_millis(1_000)).await;
        assert!(service.calls().is_empty());
        assert_eq!(delivered(&sink).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn padded_value_never_reaches_service() {
        let service = Arc::new(RecordingService::default());
        let (validator, sink) = observed(Arc::clone(&service));

        let submission = validator.submit(" acct-1 ");

        assert!(matches!(submission, Submission::Rejected(_)));
        sleep(Duration::from_millis(1_000)).await;
        assert!(service.calls().is_empty());
        assert_eq!(delivered(&sink).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_and_failing_service_report_invalid() {
        let service = Arc::new(RecordingService {
            taken: vec!["acct-taken".to_owned()],
            ..RecordingService::default()
        });
        let (validator, sink) = observed(Arc::clone(&service));
        validator.submit("acct-taken");
        sleep(Duration::from_millis(600)).await;
        assert_eq!(
            delivered(&sink)[0].error.as_deref(),
            Some("already registered")
        );

        let failing = Arc::new(RecordingService {
            fail: true,
            ..RecordingService::default()
        });
        let (validator, sink) = observed(failing);
        validator.submit("acct-1");
        sleep(Duration::from_millis(600)).await;
        let outcome = &delivered(&sink)[0];
        assert!(!outcome.is_valid);
        assert!(outcome
            .error
            .as_deref()
            .is_some_and(|error| error.contains("upstream down")));
    }

    #[test]
    fn contact_precheck_accepts_email_and_phone() {
        assert!(FieldKind::Contact.precheck("kit@example.com").is_ok());
        assert!(FieldKind::Contact.precheck("+1 555-010-9999").is_ok());
        assert!(FieldKind::Contact.precheck("kit@localhost").is_err());
        assert!(FieldKind::Contact.precheck("a@b.c@d.e").is_err());
        assert!(FieldKind::Contact.precheck("+1 555-010-9999 ").is_err());
        assert!(FieldKind::Contact.precheck("12345").is_err());
        assert!(FieldKind::Contact.precheck("   ").is_err());
    }

    #[test]
    fn address_precheck_rejects_whitespace_and_symbols() {
        assert!(FieldKind::Address.precheck("0xAbC123").is_ok());
        assert_eq!(
            FieldKind::Address.precheck("ab cd"),
            Err("address must not contain whitespace".to_owned())
        );
        assert!(FieldKind::Address.precheck("ab$cd").is_err());
    }

    #[test]
    fn padded_address_is_rejected() {
        assert_eq!(
            FieldKind::Address.precheck(" acct-1 "),
            Err("address must not start or end with whitespace".to_owned())
        );
        assert_eq!(
            FieldKind::Address.precheck("acct-1\t"),
            Err("address must not start or end with whitespace".to_owned())
        );
    }
}
