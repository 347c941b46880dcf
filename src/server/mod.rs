//! HTTP server for Cropgate

pub mod http;

pub use http::{run, AppState};
