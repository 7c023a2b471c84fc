//! The three-way error taxonomy every reconcile step returns into: terminal,
//! transient, or awaiting-precondition. See `condition::reasons` for the
//! status reasons each maps to.

use std::fmt;

use thiserror::Error;

/// How a `ReconcileError` should be handled by the step runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminality {
    /// Irrecoverable given current inputs; stop until the object's
    /// generation changes.
    Terminal,
    /// Retry with exponential backoff.
    Transient,
    /// No external fault; a dependency isn't ready yet. Requeue shortly,
    /// without backoff growth.
    AwaitingPrecondition,
}

#[derive(Debug, Clone, Error)]
#[error("{reason}: {message}")]
pub struct ReconcileError {
    pub terminality: Terminality,
    /// CamelCase reason token, e.g. `Blocked`, `InvalidConfiguration`.
    pub reason: String,
    pub message: String,
}

impl ReconcileError {
    pub fn terminal(reason: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            terminality: Terminality::Terminal,
            reason: reason.into(),
            message: message.to_string(),
        }
    }

    pub fn transient(reason: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            terminality: Terminality::Transient,
            reason: reason.into(),
            message: message.to_string(),
        }
    }

    pub fn awaiting(reason: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            terminality: Terminality::AwaitingPrecondition,
            reason: reason.into(),
            message: message.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminality == Terminality::Terminal
    }
}
