//! Model-facing types, chunk decoding and the completion client

pub mod client;
pub mod streaming;
pub mod types;
