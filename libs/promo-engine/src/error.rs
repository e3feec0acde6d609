use thiserror::Error;

/// Outcome taxonomy for promotion mutation and redemption.
///
/// Everything except `Dependency` is an expected business outcome returned
/// to the caller unchanged; only `Dependency` represents a server-side
/// failure worth logging at error level.
#[derive(Debug, Error)]
pub enum PromoError {
    #[error("promotion not found")]
    NotFound,
    #[error("promotion already redeemed by this user")]
    AlreadyRedeemed,
    #[error("user is not eligible for this promotion")]
    NotEligible,
    #[error("promotion capacity is exhausted")]
    CapacityExhausted,
    #[error("redemption rejected by fraud check")]
    FraudCheckRejected,
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("dependency failure")]
    Dependency(#[from] anyhow::Error),
}

impl PromoError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        PromoError::Validation {
            field,
            reason: reason.into(),
        }
    }
}
