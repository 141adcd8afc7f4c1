//! HTTP API: run submission, inspection, and the live status stream.

pub mod app;
