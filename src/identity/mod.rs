//! Beneficiary identity: DPI normalization and duplicate detection among
//! active beneficiaries of the same subtype.

pub mod beneficiary;
pub mod conflict;
pub mod normalize;

pub use beneficiary::*;
pub use conflict::*;
pub use normalize::*;
