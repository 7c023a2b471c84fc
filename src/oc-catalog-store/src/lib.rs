// BEGIN LINT CONFIG
// DO NOT EDIT. Automatically generated by bin/gen-lints.
#![allow(unknown_lints)]
#![allow(clippy::style)]
#![allow(clippy::complexity)]
#![warn(clippy::bool_comparison)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::todo)]
#![warn(clippy::unwrap_used)]
// END LINT CONFIG

//! Persists one unpacked File-Based Catalog per catalog name and serves it
//! at `<base>/catalogs/<name>/api/v1/{all,metas}`.

mod error;
mod http;
mod index;
mod store;

pub use error::{Error, Result};
pub use http::router;
pub use store::CatalogStore;
