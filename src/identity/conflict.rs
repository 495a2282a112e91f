use serde::Serialize;

use super::beneficiary::BeneficiarySubtype;
use super::normalize::IdentityValue;

/// A subtype record that may already claim an identity value.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentityCandidate {
    /// Id of the subtype record.
    pub record_id: String,
    pub beneficiary_id: String,
    pub subtype: BeneficiarySubtype,
    pub active: bool,
    /// The identity column as stored, not normalized.
    pub raw_value: Option<String>,
}

/// The existing record a proposed identity value collides with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IdentityConflict {
    pub subtype: BeneficiarySubtype,
    /// Normalized value both records share.
    pub value: String,
    pub beneficiary_id: String,
    pub record_id: String,
}

/// Finds an active record of `subtype` whose identity normalizes to the same
/// value as `raw_value`. Records owned by `exclude` (a beneficiary id) are
/// skipped, so a beneficiary being edited never collides with itself. An
/// empty identity never conflicts and short-circuits before any scan.
pub fn find_conflict<'a>(
    candidates: &'a [IdentityCandidate],
    subtype: BeneficiarySubtype,
    raw_value: Option<&str>,
    exclude: Option<&str>,
) -> Option<&'a IdentityCandidate> {
    let value = IdentityValue::from_raw(raw_value);
    if value.is_empty() {
        return None;
    }

    candidates
        .iter()
        .filter(|c| c.subtype == subtype && c.active)
        .filter(|c| exclude != Some(c.beneficiary_id.as_str()))
        .find(|c| IdentityValue::from_raw(c.raw_value.as_deref()) == value)
}

/// `find_conflict`, shaped for the error a caller reports.
pub fn check_identity(
    candidates: &[IdentityCandidate],
    subtype: BeneficiarySubtype,
    raw_value: Option<&str>,
    exclude: Option<&str>,
) -> Option<IdentityConflict> {
    find_conflict(candidates, subtype, raw_value, exclude).map(|c| IdentityConflict {
        subtype,
        value: IdentityValue::from_raw(raw_value).into_string(),
        beneficiary_id: c.beneficiary_id.clone(),
        record_id: c.record_id.clone(),
    })
}
