//! # Load-test command parser
//!
//! Turns free-text load-test requests (curl commands, raw HTTP, JSON with
//! prose, several concatenated requests, or plain English) into a
//! structured [`LoadTestSpec`], with confidence, assumptions, and
//! ambiguities attached.
//!
//! An AI provider does the heavy lifting; every step around it is
//! deterministic, and a rule-based fallback parser keeps the pipeline
//! usable when the provider is slow, wrong, or absent.
//!
//! ## Core Concepts
//!
//! - **[`CommandParser`]**: runs preprocess, format detection, context
//!   enhancement, prompt building, the AI call, response parsing, and
//!   validation, escalating failures to recovery.
//! - **[`ExecCtx`]**: shared execution context (HTTP client, AI backend,
//!   configuration, metrics, cancellation, optional event handler).
//! - **[`ErrorRecoverySystem`]**: classifies failures and tries `retry`,
//!   `enhance_prompt`, or `fallback` strategies by confidence.
//! - **[`ConfigManager`]** / **[`ParsingMetricsCollector`]**: process-wide
//!   state, injected through the context.
//!
//! ## Quick Start
//!
//! ```no_run
//! use loadtest_parser::{CommandParser, ExecCtx};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = ExecCtx::builder("http://localhost:11434")
//!         .model("llama3.2:3b")
//!         .build();
//!     let parser = CommandParser::new(ctx);
//!
//!     let outcome = parser
//!         .parse("curl -X POST https://api.shop.test/orders -d '{\"sku\":\"{{skuId}}\"}' with 100 users for 10 minutes")
//!         .await?;
//!     println!("{} ({:.2})", outcome.spec.name, outcome.confidence);
//!     for assumption in &outcome.assumptions {
//!         println!("  assumed: {}", assumption);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Offline
//!
//! Without an AI provider the fallback parser answers directly:
//!
//! ```
//! use loadtest_parser::{CommandParser, ExecCtx, ParseSource};
//!
//! # tokio_test::block_on(async {
//! let parser = CommandParser::new(ExecCtx::builder("http://unused").without_ai().build());
//! let outcome = parser.parse("GET https://shop.test/health 20 users").await.unwrap();
//! assert_eq!(outcome.source, ParseSource::Fallback);
//! assert!(outcome.confidence < 0.5);
//! # });
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod fallback;
pub mod format;
pub mod json_repair;
pub mod llm_call;
pub mod monitoring;
pub mod pipeline;
pub mod preprocess;
pub mod prompt;
pub mod recovery;
pub mod response;
pub mod types;
pub mod validator;

pub use backend::{Backend, BackoffConfig, MockBackend, OllamaBackend};
#[cfg(feature = "openai")]
pub use backend::OpenAiBackend;
pub use config::{ConfigManager, ParserConfig};
pub use context::ContextEnhancer;
pub use error::{PipelineError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use fallback::{FallbackResult, IntelligentFallbackParser};
pub use format::{FormatDetection, FormatDetector, InputFormat};
pub use llm_call::AiCall;
pub use load_test::{LoadTestSpec, RequestSpec};
pub use monitoring::{DiagnosticAnalyzer, ParseAttempt, ParsingMetricsCollector, PerformanceMonitor};
pub use pipeline::{CommandParser, ParseOutcome};
pub use preprocess::InputPreprocessor;
pub use prompt::{EnhancedPrompt, SmartPromptBuilder};
pub use recovery::{ErrorRecoverySystem, ParseError, RecoveryStrategy, StrategyFactory};
pub use response::{ParsedResponse, ResponseParser, VariableTypeRules};
pub use types::{ParseContext, ParseSource};
pub use validator::{CommandValidator, ValidationReport};
