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

//! A filesystem-backed cache of catalog content (§4.D), keyed by
//! `(catalog-name, resolved-digest)`, with at-most-one concurrent populate
//! per key and error-caching. Consumed by the resolver (§4.E).

mod client;
mod error;
pub mod fbc;

pub use client::{CacheClient, CatalogRef};
pub use error::{Error, Result};
