//! Core data models for the document processing gateway.
//!
//! These types describe one request's journey: the uploaded items and their
//! validation, the workspace that holds them, the worker's decoded result and
//! the pending download that publishes it. They serialize naturally as JSON
//! via `serde` where they reach the HTTP surface.

pub mod download;
pub mod report;
pub mod tool;
pub mod upload;
pub mod worker;
pub mod workspace;
