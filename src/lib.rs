//! # forecast-agent
//!
//! An autonomous forecasting agent for Metaculus-style tournaments. Given a
//! question id, the agent fetches the question, orchestrates a research
//! workflow (web search, market prices, economic data, Wikipedia,
//! historical archives) through a tool-use loop with a reasoning model,
//! collects a structured forecast, converts it into the platform's wire
//! format, and optionally submits it.
//!
//! ## Key capabilities
//!
//! - **Tool registry**: heterogeneous research tools under one
//!   request/response protocol, namespaced and policy-gated by available
//!   credentials.
//! - **Retrodict mode**: run the agent as if "today" were a past date;
//!   every information source is restricted to pre-cutoff data, with search
//!   results validated against the Wayback Machine.
//! - **Sub-question fan-out**: the model can decompose a question and
//!   forecast the parts concurrently, each in its own session.
//! - **CDF builder**: sparse percentile forecasts (or scenario mixtures)
//!   become the dense 201-point CDF the platform requires.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use forecast_agent::{ForecastRequest, Services, Settings, run_forecast};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let services = Services::new(Settings::from_env());
//!     let output = run_forecast(services, ForecastRequest::for_post(41906)).await?;
//!     println!("{}: {:?}", output.question_title, output.probability);
//!     Ok(())
//! }
//! ```

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Archive-backed web search for retrodict mode.
pub mod archive;

/// TTL cache for idempotent API reads.
pub mod cache;

/// Model session: streaming chat loop with tool dispatch.
pub mod client;

/// Sub-question composition (spawn_subquestions).
pub mod compose;

/// Environment-driven configuration.
pub mod config;

/// Error types and the credit-exhaustion parser.
pub mod error;

/// On-disk forecast history.
pub mod history;

/// Pre/post tool-use hooks.
pub mod hooks;

/// Named per-resource concurrency limits.
pub mod limits;

/// Market, economic-data, and trends tools.
pub mod markets;

/// Metaculus platform client.
pub mod metaculus;

/// Tool-call metrics.
pub mod metrics;

/// Structured notes tool.
pub mod notes;

/// Percentile-to-CDF conversion.
pub mod numeric;

/// Orchestrator: one question end to end.
pub mod orchestrator;

/// Tool availability policy.
pub mod policy;

/// System prompt assembly.
pub mod prompts;

/// Platform research tools (metadata, CP history, Wikipedia, search).
pub mod research;

/// Retrodict cutoff and enforcement hooks.
pub mod retrodict;

/// Retry with exponential backoff and jitter.
pub mod retry;

/// Docker sandbox for code execution.
pub mod sandbox;

/// Shared services and per-forecast session context.
pub mod session;

/// SSE parsing and tool-call delta aggregation.
pub mod sse;

/// Forecast submission and reasoning comments.
pub mod submission;

/// Tool definitions, result envelopes, and the registry.
pub mod tools;

/// Core data model: questions, forecasts, model wire format.
pub mod types;

/// Wayback Machine access.
pub mod wayback;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

pub use config::Settings;
pub use error::{Error, Result, parse_credit_exhausted};
pub use history::{ForecastStore, SavedForecast};
pub use hooks::{HookDecision, Hooks};
pub use metaculus::{ApiFilter, MetaculusClient, Question};
pub use orchestrator::run_forecast;
pub use policy::ToolPolicy;
pub use retrodict::RetrodictCutoff;
pub use session::{Services, Session};
pub use submission::{
    create_forecast_payload, format_reasoning_comment, post_comment, submit_forecast,
};
pub use tools::{Tool, ToolBuilder, ToolCall, ToolRegistry, ToolResult, tool};
pub use types::{
    BinaryForecast, Factor, Forecast, ForecastOutput, ForecastRequest, MultipleChoiceForecast,
    NumericBounds, NumericForecast, Percentiles, QuestionContext, QuestionType,
    ScenarioComponent, TokenUsage,
};

/// Convenience module with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Error, Forecast, ForecastOutput, ForecastRequest, QuestionContext, QuestionType,
        Result, RetrodictCutoff, Services, Session, Settings, Tool, ToolPolicy, ToolRegistry,
        ToolResult, run_forecast, tool,
    };
}
