//! Centralized constants: rate limits, model ids, endpoints

/// Free-tier Gemini rate limits. Paid keys bypass all four.
pub mod rate_limits {
    /// Requests per minute
    pub const RPM: u32 = 5;
    /// Requests per day
    pub const RPD: u32 = 25;
    /// Tokens per minute
    pub const TPM: u64 = 250_000;
    /// Tokens per day
    pub const TPD: u64 = 1_000_000;
}

pub mod models {
    pub const DEFAULT_CHAT: &str = "gemini-2.5-pro-preview-05-06";
    pub const DEFAULT_EMBEDDING: &str = "text-embedding-004";
}

pub mod endpoints {
    pub const GEMINI_DEFAULT: &str = "https://generativelanguage.googleapis.com/v1beta";
    pub const NEO4J_HTTP_DEFAULT: &str = "http://localhost:7474";
}

pub mod paths {
    /// Persisted per-key usage table, rewritten atomically after every call
    pub const USAGE_STATE_FILE: &str = ".gemini_usage.json";
    pub const CHECKPOINT_DIR: &str = "checkpoints";
    pub const EMBEDDING_FAILURE_DIR: &str = "logs/embedding_failures";
}

/// Rough token estimate for a minute of transcribed audio.
pub const TOKENS_PER_AUDIO_MINUTE: u64 = 2_000;

/// A model response caps out near this many output tokens; longer episodes
/// go through the continuation loop.
pub const MAX_OUTPUT_TOKENS: usize = 8_192;
