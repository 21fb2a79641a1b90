//! Example: parsing without an AI provider.
//!
//! Every input goes straight to the deterministic fallback parser; the
//! metrics summary at the end shows the fallback ratio.
//!
//! Run with: `cargo run --example offline_fallback`

use loadtest_parser::{CommandParser, ExecCtx};
use tracing_subscriber::EnvFilter;

const INPUTS: &[&str] = &[
    "curl https://shop.test/api/products?page=2 -H 'Accept: application/json'",
    "POST /api/login with 50 concurrent users for 5 minutes",
    "Request 1: GET https://shop.test/cart\nRequest 2: POST https://shop.test/checkout {\"cartId\": \"{{cartId}}\"}",
    "spike test the homepage",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = ExecCtx::builder("http://unused").without_ai().build();
    let level = ctx.config.get_config().monitoring.log_level;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let parser = CommandParser::new(ctx);
    for (input, result) in INPUTS.iter().zip(parser.parse_many(INPUTS.iter().copied()).await) {
        let outcome = result?;
        println!("> {}", input.lines().next().unwrap_or_default());
        for request in &outcome.spec.requests {
            println!("  {} {}", request.method, request.url);
        }
        println!(
            "  {:?} load for {} (confidence {:.2})",
            outcome.spec.load_pattern.pattern_type, outcome.spec.duration, outcome.confidence
        );
        for assumption in &outcome.assumptions {
            println!("  assumed: {}", assumption);
        }
    }

    let summary = parser.ctx().metrics.summary();
    println!(
        "{} attempts, fallback ratio {:.2}, mean latency {:.1}ms",
        summary.total_attempts, summary.fallback_ratio, summary.mean_latency_ms
    );
    Ok(())
}
