//! Example: parsing with a scripted AI backend, recovery included.
//!
//! The first reply uses an HTTP method that does not exist, so validation
//! rejects it and the parser recovers with an enhanced prompt.
//!
//! Run with: `cargo run --example mock_parse`

use loadtest_parser::events::{Event, FnEventHandler};
use loadtest_parser::{CommandParser, ConfigManager, ExecCtx, MockBackend};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const INPUT: &str = r#"curl -X POST https://api.shop.test/orders \
  -H 'Content-Type: application/json' \
  -d '{"sku": "{{skuId}}", "placedAt": "{{orderTime}}"}'
Ramp up to 200 users over 2 minutes, then hold for 10 minutes."#;

const REJECTED_REPLY: &str = r#"{"name": "Orders", "requests": [{"method": "SUBMIT", "url": "https://api.shop.test/orders"}]}"#;

const REPLY: &str = r#"```json
{
  "name": "Order placement ramp",
  "testType": "load",
  "requests": [{
    "method": "POST",
    "url": "https://api.shop.test/orders",
    "headers": {"Content-Type": "application/json"},
    "payload": {"template": "{\"sku\": \"{{skuId}}\", \"placedAt\": \"{{orderTime}}\"}"}
  }],
  "loadPattern": {"type": "ramp", "virtualUsers": 200, "rampUpTime": "2m", "plateauTime": "10m"},
  "duration": "12m"
}
```"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(ConfigManager::default());
    let level = config.get_config().monitoring.log_level;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let mock = MockBackend::new(vec![REJECTED_REPLY.into(), REPLY.into()]);
    let handler = FnEventHandler(|event: Event| match event {
        Event::RecoveryAttempt { strategy, error_type, .. } => println!("recovering from {} via {}", error_type, strategy),
        Event::StageEnd { stage, ok: false, .. } => println!("stage {} failed", stage),
        _ => {}
    });

    let ctx = ExecCtx::builder("http://unused")
        .backend(Arc::new(mock))
        .config(config)
        .event_handler(Arc::new(handler))
        .build();
    let parser = CommandParser::new(ctx);

    let outcome = parser.parse(INPUT).await?;
    println!("source: {}", outcome.source.as_str());
    println!("recovery path: {:?}", outcome.recovery_path);
    println!("confidence: {:.2}", outcome.confidence);
    for warning in &outcome.warnings {
        println!("warning: {}", warning);
    }
    println!("{}", serde_json::to_string_pretty(&outcome.spec)?);

    let analyzer = parser.analyzer();
    let report = analyzer.generate_report();
    println!("success rate: {:.2}", report.summary.success_rate);
    for recommendation in &report.recommendations {
        println!("recommendation: {}", recommendation.message);
    }

    Ok(())
}
