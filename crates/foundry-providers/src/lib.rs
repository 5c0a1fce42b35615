//! Generation provider adapters.
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        reason = "Allow for tests"
    )
)]

/// Anthropic Messages API provider.
pub mod anthropic;
/// Pattern-matching mock provider.
pub mod mock;

pub use anthropic::AnthropicProvider;
pub use mock::MockProvider;
