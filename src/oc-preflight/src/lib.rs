#![warn(clippy::unwrap_used, clippy::todo, clippy::dbg_macro)]
#![allow(clippy::needless_return)]

//! Preflight checks (§4.G): run before a rendered object set is applied.
//! Each check is registered in order; the first failure short-circuits the
//! step with a terminal or transient error named after the preflight.

mod crd_safety;
mod error;
mod rbac;

use kube::Client;
use serde_json::Value;

pub use error::{Error, Result};
pub use rbac::Identity;

/// Run all registered preflights in order against `rendered`, stopping at
/// the first rejection. `rbac_identity` is `None` when RBAC
/// pre-authorization is disabled.
pub async fn run(client: &Client, rendered: &[Value], rbac_identity: Option<&Identity>) -> Result<()> {
    crd_safety::check(client, rendered).await?;
    if let Some(identity) = rbac_identity {
        rbac::check(client, identity, rendered).await?;
    }
    Ok(())
}

pub use crd_safety::check as check_crd_upgrade_safety;
pub use rbac::check as check_rbac;
