//! Core types and errors for the posture cloud auditing engine.
//!
//! This crate provides the vocabulary shared by the engine, the check library
//! and the CLI:
//!
//! - **Types**: providers, execution scopes, raw and normalized findings
//! - **Errors**: run-level [`PostureError`], per-check [`CheckError`] and
//!   [`NormalizationError`]
//!
//! # Example
//!
//! ```rust,ignore
//! use posture_core::{ComplianceStatus, RawFinding, Resource, Severity};
//!
//! let finding = RawFinding::new("arn:aws:cloudtrail:us-east-1:111:trail/main/multi-region")
//!     .status(ComplianceStatus::Failed)
//!     .severity(Severity::Medium)
//!     .resource(Resource::new("AwsCloudTrailTrail", "arn:aws:cloudtrail:us-east-1:111:trail/main"));
//! ```

#![doc(html_root_url = "https://docs.rs/posture-core/0.4.0")]

mod error;
pub mod types;

pub use error::{CheckError, NormalizationError, PostureError, Result};
pub use types::*;
