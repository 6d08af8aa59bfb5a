use strum::{AsRefStr, Display};
use thiserror::Error;

/// Which checkout datum could not be found in any source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionDatum {
    #[strum(serialize = "Shipping information")]
    Shipping,
    #[strum(serialize = "Cart items")]
    Cart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Verification,
    SessionData,
    Materialization,
}

/// Terminal failures of a reconciliation run. Each message is shown to the
/// buyer verbatim and carries the reference when one is known.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconciliationError {
    #[error("Payment reference not found in the callback. Please return to checkout and try again.")]
    MissingReference,

    #[error("Payment verification failed: {reason}. Reference: {reference}")]
    Verification { reference: String, reason: String },

    #[error("{datum} not found. Your payment was received; please keep reference {reference} and contact support.")]
    SessionData {
        reference: String,
        datum: SessionDatum,
    },

    #[error("Payment succeeded but order creation failed: {reason}. Please contact support with reference {reference}.")]
    Materialization { reference: String, reason: String },
}

impl ReconciliationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingReference => ErrorKind::Input,
            Self::Verification { .. } => ErrorKind::Verification,
            Self::SessionData { .. } => ErrorKind::SessionData,
            Self::Materialization { .. } => ErrorKind::Materialization,
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::MissingReference => None,
            Self::Verification { reference, .. }
            | Self::SessionData { reference, .. }
            | Self::Materialization { reference, .. } => Some(reference),
        }
    }

    /// Money has moved but no order exists.
    pub fn payment_taken(&self) -> bool {
        matches!(self, Self::SessionData { .. } | Self::Materialization { .. })
    }
}
