use thiserror::Error;

use crate::identity::BeneficiarySubtype;

/// Rejections of a write that the caller is expected to report to the user.
/// Returned inside `anyhow::Error`; use `downcast_ref::<ValidationError>()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{subtype} identity {value} is already registered to beneficiary {beneficiary_id}")]
    IdentityConflict {
        subtype: BeneficiarySubtype,
        /// Normalized value both records share.
        value: String,
        beneficiary_id: String,
    },

    #[error("a change needs at least one collaborator")]
    NoCollaborators,
}
