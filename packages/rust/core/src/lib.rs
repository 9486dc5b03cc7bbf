//! Core domain logic and pipeline orchestration for auditdoc.
//!
//! This crate validates canonical documents, checks them against template
//! field manifests, builds render contexts, and ties acquisition, rendering
//! and upload into one request flow ([`pipeline::ReportPipeline`]).

pub mod context;
pub mod grammar;
pub mod manifest;
pub mod outcome;
pub mod pipeline;
pub mod upload;
pub mod validator;
