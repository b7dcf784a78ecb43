//! askstream - streaming relay between clients and an LLM completion endpoint
//!
//! This crate provides a daemon that forwards a user question to an
//! OpenAI-compatible chat completion API, relays the generated tokens to the
//! waiting client as server-sent events, and records each finished exchange.

pub mod config;
pub mod error;
pub mod history;
pub mod relay;
pub mod testing;

pub use error::AskStreamError;
