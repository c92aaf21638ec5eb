//! Quota-managed Gemini client
//!
//! Sole path for LLM and embedding calls. Features:
//! - Multi-key selection honoring free-tier minute spacing and daily budgets
//! - Paid-tier keys bypass quotas and are preferred when present
//! - Persistent per-key usage accounting (`.gemini_usage.json`, atomic rewrite)
//! - Retry with exponential backoff and jitter; per-(operation, key) circuit
//!   breaker
//! - Continuation-based completion of length-limited transcription responses

pub mod breaker;
pub mod client;
pub mod transcribe;
pub mod transport;
pub mod usage;

pub use breaker::CircuitBreaker;
pub use client::GeminiClient;
pub use transcribe::{stitch_transcripts, transcript_coverage, AudioSource, TranscriptionOutcome};
pub use transport::{GeminiTransport, HttpTransport};
pub use usage::{KeyUsage, UsageTable};

pub use podgraph_core::{LlmError, LlmResult};
