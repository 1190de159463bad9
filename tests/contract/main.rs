//! HTTP contract tests against a local mock server.

mod client;
mod common;
mod oauth;
