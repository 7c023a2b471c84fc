// BEGIN LINT CONFIG
// DO NOT EDIT. Automatically generated by bin/gen-lints.
#![allow(unknown_lints)]
#![allow(clippy::style)]
#![allow(clippy::complexity)]
#![warn(clippy::bool_comparison)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::no_effect)]
#![warn(clippy::unnecessary_unwrap)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::todo)]
#![warn(clippy::wildcard_dependencies)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::unwrap_used)]
// END LINT CONFIG

//! Core data model shared by the catalog and extension reconciliation pipeline:
//! `Catalog`, `ClusterExtension`, `ClusterExtensionRevision`, the resolved `Bundle`
//! value, and the condition/time helpers every reconciler builds on.

pub mod bundle;
pub mod catalog;
pub mod condition;
pub mod error;
pub mod extension;
pub mod revision;
pub mod time;

pub use bundle::ResolvedBundle;
pub use catalog::{Catalog, CatalogSource, ImageSource};
pub use condition::{Condition, ConditionStatus, Conditions};
pub use error::{ReconcileError, Terminality};
pub use extension::{ClusterExtension, ClusterExtensionSpec, UpgradeConstraintPolicy};
pub use revision::ClusterExtensionRevision;
