use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The three kinds of beneficiary. Each keeps its identity values in its
/// own namespace and its own identity column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeneficiarySubtype {
    Individual,
    Family,
    Institution,
}

impl BeneficiarySubtype {
    pub const ALL: [BeneficiarySubtype; 3] = [
        BeneficiarySubtype::Individual,
        BeneficiarySubtype::Family,
        BeneficiarySubtype::Institution,
    ];

    /// Column holding the national ID that takes part in conflict checks.
    pub fn identity_field(&self) -> &'static str {
        match self {
            BeneficiarySubtype::Individual => "dpi",
            BeneficiarySubtype::Family => "dpi_jefe_familia",
            BeneficiarySubtype::Institution => "dpi_representante",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            BeneficiarySubtype::Individual => "IndividualProfile",
            BeneficiarySubtype::Family => "FamilyProfile",
            BeneficiarySubtype::Institution => "InstitutionProfile",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BeneficiarySubtype::Individual => "individual",
            BeneficiarySubtype::Family => "family",
            BeneficiarySubtype::Institution => "institution",
        }
    }
}

impl fmt::Display for BeneficiarySubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BeneficiarySubtype {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(BeneficiarySubtype::Individual),
            "family" => Ok(BeneficiarySubtype::Family),
            "institution" => Ok(BeneficiarySubtype::Institution),
            other => Err(anyhow::anyhow!("Unknown beneficiary kind '{}'", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
pub struct IndividualProfile {
    pub id: String,
    pub beneficiary_id: String,
    pub first_name: String,
    pub last_name: String,
    pub dpi: Option<String>,
    pub phone: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FamilyProfile {
    pub id: String,
    pub beneficiary_id: String,
    pub family_name: String,
    pub head_of_household: String,
    pub dpi_jefe_familia: Option<String>,
    pub member_count: i64,
}

impl Default for FamilyProfile {
    fn default() -> Self {
        Self {
            id: String::new(),
            beneficiary_id: String::new(),
            family_name: String::new(),
            head_of_household: String::new(),
            dpi_jefe_familia: None,
            member_count: 1,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq)]
pub struct InstitutionProfile {
    pub id: String,
    pub beneficiary_id: String,
    pub name: String,
    pub institution_type: Option<String>,
    pub representative_name: Option<String>,
    pub dpi_representante: Option<String>,
}

/// The one subtype record a beneficiary owns.
#[derive(Clone, Debug, PartialEq)]
pub enum BeneficiaryProfile {
    Individual(IndividualProfile),
    Family(FamilyProfile),
    Institution(InstitutionProfile),
}

impl BeneficiaryProfile {
    pub fn subtype(&self) -> BeneficiarySubtype {
        match self {
            BeneficiaryProfile::Individual(_) => BeneficiarySubtype::Individual,
            BeneficiaryProfile::Family(_) => BeneficiarySubtype::Family,
            BeneficiaryProfile::Institution(_) => BeneficiarySubtype::Institution,
        }
    }

    /// The identity value as typed, before normalization.
    pub fn identity_raw(&self) -> Option<&str> {
        match self {
            BeneficiaryProfile::Individual(p) => p.dpi.as_deref(),
            BeneficiaryProfile::Family(p) => p.dpi_jefe_familia.as_deref(),
            BeneficiaryProfile::Institution(p) => p.dpi_representante.as_deref(),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            BeneficiaryProfile::Individual(p) => format!("{} {}", p.first_name, p.last_name),
            BeneficiaryProfile::Family(p) => p.family_name.clone(),
            BeneficiaryProfile::Institution(p) => p.name.clone(),
        }
    }
}

/// A beneficiary with its subtype record resolved.
#[derive(Clone, Debug, PartialEq)]
pub struct Beneficiary {
    pub id: String,
    pub active: bool,
    pub community_id: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    pub profile: BeneficiaryProfile,
}

impl Beneficiary {
    /// A new, active beneficiary. Ids are assigned on save.
    pub fn new(profile: BeneficiaryProfile) -> Self {
        Self {
            id: String::new(),
            active: true,
            community_id: None,
            registered_at: None,
            profile,
        }
    }

    pub fn subtype(&self) -> BeneficiarySubtype {
        self.profile.subtype()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_round_trips_through_text() -> anyhow::Result<()> {
        for subtype in BeneficiarySubtype::ALL {
            assert_eq!(subtype.as_str().parse::<BeneficiarySubtype>()?, subtype);
        }
        assert!("cooperativa".parse::<BeneficiarySubtype>().is_err());
        Ok(())
    }

    #[test]
    fn profile_exposes_its_own_identity_field() {
        let family = BeneficiaryProfile::Family(FamilyProfile {
            family_name: "Familia Xol".to_string(),
            head_of_household: "Juan Xol".to_string(),
            dpi_jefe_familia: Some("2501 45678 0101".to_string()),
            ..Default::default()
        });
        assert_eq!(family.subtype(), BeneficiarySubtype::Family);
        assert_eq!(family.subtype().identity_field(), "dpi_jefe_familia");
        assert_eq!(family.identity_raw(), Some("2501 45678 0101"));
        assert_eq!(family.display_name(), "Familia Xol");
    }
}
