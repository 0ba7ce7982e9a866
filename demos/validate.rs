use std::time::Duration;

use resilient_http::{
    DebouncedValidator, FieldKind, HttpValidationService, RetryPolicy, Submission,
    ValidatorOptions,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let base_url = std::env::var("RESILIENT_HTTP_BASE_URL")?;
    let service = HttpValidationService::new(base_url).with_policy(RetryPolicy::from_env()?);
    let validator =
        DebouncedValidator::new(service, FieldKind::Contact, ValidatorOptions::default());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    validator.on_outcome(move |outcome| {
        let _ = tx.send(outcome);
    });

    // Simulated keystrokes; only the final value is checked remotely.
    for value in ["kit", "kit@", "kit@example", "kit@example.com"] {
        if let Submission::Rejected(outcome) = validator.submit(value) {
            println!("{value:?} rejected locally: {:?}", outcome.error);
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    let latest = validator.current_sequence();
    while let Some(outcome) = rx.recv().await {
        if outcome.sequence_number == latest {
            println!("remote outcome: {outcome:?}");
            break;
        }
    }

    Ok(())
}
