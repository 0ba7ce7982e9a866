use reqwest::header::{self, HeaderMap, HeaderValue};
use resilient_http::{GatewayClient, OutboundRequest, ResponseBody, ResponseExpectation};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let gateway = GatewayClient::from_env()?;
    let token = std::env::var("RESILIENT_HTTP_TOKEN")?;

    let mut inbound = HeaderMap::new();
    inbound.insert(header::AUTHORIZATION, HeaderValue::from_str(&token)?);

    let result = gateway
        .forward(
            &inbound,
            OutboundRequest::get("/v1/reports/latest/pdf")
                .with_expectation(ResponseExpectation::binary("latest-report")),
        )
        .await;

    println!(
        "status {} after {} attempt(s)",
        result.status_code(),
        result.attempts.len()
    );
    match result.into_result() {
        Ok(ResponseBody::Binary(binary)) => {
            std::fs::write(&binary.suggested_filename, &binary.bytes)?;
            println!("saved {} bytes to {}", binary.bytes.len(), binary.suggested_filename);
        }
        Ok(ResponseBody::Redirect(target)) => println!("fetch from {}", target.locator),
        Ok(body) => println!("{body:?}"),
        Err(err) => println!("failed: {err}"),
    }

    Ok(())
}
