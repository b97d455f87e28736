//! Typed error taxonomy for the engagement engine.
//!
//! Payment and registration failures are always surfaced to the initiating
//! caller with enough context to decide whether to retry the payment or only
//! the registration.  Transient delivery conditions (channel fallback, a
//! missed heartbeat, host-refused autoplay) are NOT errors — they are states
//! reported through other types and never raise one of these.

use thiserror::Error;

use crate::model::TxReceipt;

#[derive(Debug, Error)]
pub enum RequestError {
    /// No payment confirmation was obtained.  Nothing was registered.
    #[error("payment required: {0}")]
    PaymentRequired(String),

    /// Payment confirmed but the feature-side registration failed.  Funds
    /// moved; the caller should retry registration with the same receipt
    /// rather than paying again.
    #[error("paid (receipt {receipt}) but registration failed: {reason}")]
    RegistrationAfterPaymentFailed { receipt: TxReceipt, reason: String },

    /// Microphone access refused by the user or host.
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No usable capture device present.
    #[error("no capture device available")]
    DeviceUnavailable,

    /// Durable storage of a recorded clip failed.
    #[error("clip upload failed: {0}")]
    UploadFailed(String),

    /// The external reward transfer did not confirm; ledger state unchanged.
    #[error("reward claim failed: {0}")]
    ClaimFailed(String),

    /// Malformed or unsatisfiable request (empty clip, unknown listener...).
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl RequestError {
    /// True when funds have already moved for this request.
    pub fn payment_confirmed(&self) -> bool {
        matches!(self, RequestError::RegistrationAfterPaymentFailed { .. })
    }

    /// The receipt attached to this error, when one exists.
    pub fn receipt(&self) -> Option<&TxReceipt> {
        match self {
            RequestError::RegistrationAfterPaymentFailed { receipt, .. } => Some(receipt),
            _ => None,
        }
    }
}
