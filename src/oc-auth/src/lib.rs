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

//! The extension reconciler's auth boundary (§4.F): service-account token
//! caching, synthetic-user vs. service-account impersonation, and
//! pull-secret aggregation.

mod error;
mod impersonate;
mod pullsecret;
mod token;

pub use error::{Error, Result};
pub use impersonate::{client_for_extension, synthetic_user_identity, ImpersonationIdentity};
pub use pullsecret::PullSecretReconciler;
pub use token::{ServiceAccountKey, TokenGetter};
