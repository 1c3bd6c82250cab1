//! Language model provider implementations for LearnPath.
//!
//! All providers implement the `learnpath_core::Provider` trait.

pub mod anthropic;

pub use anthropic::AnthropicProvider;
