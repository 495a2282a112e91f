use anyhow::Result;
use chrono::Utc;
use rusqlite::{OptionalExtension, Params};
use serde::{Deserialize, Serialize};

use super::core::Db;
use super::transaction::DbTransaction;
use super::Entity;
use crate::error::ValidationError;
use crate::identity::{
    check_identity, Beneficiary, BeneficiaryProfile, BeneficiarySubtype, IdentityCandidate,
    IdentityConflict,
};

mod record {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    /// The Beneficiary table. The subtype lives in its own table.
    #[derive(Serialize, Deserialize, Debug)]
    pub(super) struct Beneficiary {
        pub id: String,
        pub kind: String,
        pub active: bool,
        pub community_id: Option<String>,
        pub registered_at: Option<DateTime<Utc>>,
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct CandidateRow {
    record_id: String,
    beneficiary_id: String,
    active: bool,
    raw_value: Option<String>,
}

/// Reads shared by `Db`, under its read lock, and `DbTransaction`, inside
/// the write.
trait ReadRows {
    fn read<E: Entity, P: Params>(&self, sql: &str, params: P) -> Result<Vec<E>>;
    fn read_by_id<E: Entity>(&self, id: &str) -> Result<Option<E>>;
}

impl ReadRows for Db {
    fn read<E: Entity, P: Params>(&self, sql: &str, params: P) -> Result<Vec<E>> {
        self.query(sql, params)
    }

    fn read_by_id<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        self.get(id)
    }
}

impl<'a> ReadRows for DbTransaction<'a> {
    fn read<E: Entity, P: Params>(&self, sql: &str, params: P) -> Result<Vec<E>> {
        self.query(sql, params)
    }

    fn read_by_id<E: Entity>(&self, id: &str) -> Result<Option<E>> {
        self.get(id)
    }
}

fn read_candidates<R: ReadRows>(reader: &R, subtype: BeneficiarySubtype) -> Result<Vec<IdentityCandidate>> {
    let sql = format!(
        "SELECT s.id AS record_id, s.beneficiary_id AS beneficiary_id, b.active AS active, s.{} AS raw_value
         FROM {} s JOIN Beneficiary b ON b.id = s.beneficiary_id
         WHERE b.active = 1
         ORDER BY s.id",
        subtype.identity_field(),
        subtype.table_name()
    );
    let rows: Vec<CandidateRow> = reader.read(&sql, ())?;
    Ok(rows
        .into_iter()
        .map(|row| IdentityCandidate {
            record_id: row.record_id,
            beneficiary_id: row.beneficiary_id,
            subtype,
            active: row.active,
            raw_value: row.raw_value,
        })
        .collect())
}

fn read_conflict<R: ReadRows>(
    reader: &R,
    subtype: BeneficiarySubtype,
    raw_value: Option<&str>,
    exclude: Option<&str>,
) -> Result<Option<IdentityConflict>> {
    if crate::identity::normalize(raw_value).is_empty() {
        return Ok(None);
    }
    let candidates = read_candidates(reader, subtype)?;
    Ok(check_identity(&candidates, subtype, raw_value, exclude))
}

fn read_beneficiary<R: ReadRows>(reader: &R, id: &str) -> Result<Option<Beneficiary>> {
    let Some(record) = reader.read_by_id::<record::Beneficiary>(id)? else {
        return Ok(None);
    };
    let subtype: BeneficiarySubtype = record.kind.parse()?;
    let profile = match subtype {
        BeneficiarySubtype::Individual => BeneficiaryProfile::Individual(read_profile(reader, subtype, id)?),
        BeneficiarySubtype::Family => BeneficiaryProfile::Family(read_profile(reader, subtype, id)?),
        BeneficiarySubtype::Institution => BeneficiaryProfile::Institution(read_profile(reader, subtype, id)?),
    };
    Ok(Some(Beneficiary {
        id: record.id,
        active: record.active,
        community_id: record.community_id,
        registered_at: record.registered_at,
        profile,
    }))
}

fn read_profile<R: ReadRows, P: Entity>(reader: &R, subtype: BeneficiarySubtype, beneficiary_id: &str) -> Result<P> {
    let sql = format!("SELECT * FROM {} WHERE beneficiary_id = ? LIMIT 1", subtype.table_name());
    reader
        .read::<P, _>(&sql, [beneficiary_id])?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Beneficiary {} has no {} record", beneficiary_id, subtype))
}

impl<'a> DbTransaction<'a> {
    /// Subtype records of active beneficiaries, with their raw identity
    /// value.
    pub fn identity_candidates(&self, subtype: BeneficiarySubtype) -> Result<Vec<IdentityCandidate>> {
        read_candidates(self, subtype)
    }

    pub fn find_identity_conflict(
        &self,
        subtype: BeneficiarySubtype,
        raw_value: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<Option<IdentityConflict>> {
        read_conflict(self, subtype, raw_value, exclude)
    }

    /// Saves a beneficiary and its subtype record. The identity value is
    /// checked against other active beneficiaries of the same subtype first;
    /// a conflict fails with `ValidationError::IdentityConflict` and nothing
    /// is written. An edit without a registration date keeps the stored one.
    pub fn save_beneficiary(&self, beneficiary: &Beneficiary) -> Result<Beneficiary> {
        let subtype = beneficiary.subtype();
        let exclude = Some(beneficiary.id.as_str()).filter(|id| !id.is_empty());
        if let Some(conflict) =
            self.find_identity_conflict(subtype, beneficiary.profile.identity_raw(), exclude)?
        {
            log::warn!(
                "Rejecting {} beneficiary {}: identity {} belongs to {}",
                subtype,
                beneficiary.profile.display_name(),
                conflict.value,
                conflict.beneficiary_id
            );
            return Err(ValidationError::IdentityConflict {
                subtype,
                value: conflict.value,
                beneficiary_id: conflict.beneficiary_id,
            }
            .into());
        }

        let registered_at = match beneficiary.registered_at {
            Some(registered_at) => registered_at,
            None => self
                .get::<record::Beneficiary>(&beneficiary.id)?
                .and_then(|stored| stored.registered_at)
                .unwrap_or_else(Utc::now),
        };
        let saved = self.save(&record::Beneficiary {
            id: beneficiary.id.clone(),
            kind: subtype.as_str().to_string(),
            active: beneficiary.active,
            community_id: beneficiary.community_id.clone(),
            registered_at: Some(registered_at),
        })?;

        // A beneficiary owns exactly one subtype record.
        for other in BeneficiarySubtype::ALL.into_iter().filter(|s| *s != subtype) {
            let sql = format!("DELETE FROM {} WHERE beneficiary_id = ?", other.table_name());
            self.execute(&sql, [&saved.id])?;
        }

        let existing_id = self.profile_id(subtype, &saved.id)?;
        let profile = match &beneficiary.profile {
            BeneficiaryProfile::Individual(p) => {
                let mut p = p.clone();
                p.beneficiary_id = saved.id.clone();
                p.id = existing_id.unwrap_or(p.id);
                BeneficiaryProfile::Individual(self.save(&p)?)
            }
            BeneficiaryProfile::Family(p) => {
                let mut p = p.clone();
                p.beneficiary_id = saved.id.clone();
                p.id = existing_id.unwrap_or(p.id);
                BeneficiaryProfile::Family(self.save(&p)?)
            }
            BeneficiaryProfile::Institution(p) => {
                let mut p = p.clone();
                p.beneficiary_id = saved.id.clone();
                p.id = existing_id.unwrap_or(p.id);
                BeneficiaryProfile::Institution(self.save(&p)?)
            }
        };

        log::info!("Saved {} beneficiary {}", subtype, saved.id);
        Ok(Beneficiary {
            id: saved.id,
            active: saved.active,
            community_id: saved.community_id,
            registered_at: saved.registered_at,
            profile,
        })
    }

    /// Loads a beneficiary with its subtype record resolved.
    pub fn get_beneficiary(&self, id: &str) -> Result<Option<Beneficiary>> {
        read_beneficiary(self, id)
    }

    fn profile_id(&self, subtype: BeneficiarySubtype, beneficiary_id: &str) -> Result<Option<String>> {
        let sql = format!("SELECT id FROM {} WHERE beneficiary_id = ?", subtype.table_name());
        Ok(self
            .connection()
            .query_row(&sql, [beneficiary_id], |row| row.get::<_, String>(0))
            .optional()?)
    }
}

impl Db {
    /// Shortcut for DbTransaction::save_beneficiary() in its own transaction.
    pub fn save_beneficiary(&self, beneficiary: &Beneficiary) -> Result<Beneficiary> {
        self.transaction(|txn| txn.save_beneficiary(beneficiary))
    }

    pub fn get_beneficiary(&self, id: &str) -> Result<Option<Beneficiary>> {
        read_beneficiary(self, id)
    }

    pub fn identity_candidates(&self, subtype: BeneficiarySubtype) -> Result<Vec<IdentityCandidate>> {
        read_candidates(self, subtype)
    }

    pub fn find_identity_conflict(
        &self,
        subtype: BeneficiarySubtype,
        raw_value: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<Option<IdentityConflict>> {
        read_conflict(self, subtype, raw_value, exclude)
    }

    /// Marks a beneficiary inactive, which frees its identity value.
    pub fn deactivate_beneficiary(&self, id: &str) -> Result<()> {
        self.transaction(|txn| {
            let affected = txn.execute("UPDATE Beneficiary SET active = 0 WHERE id = ?", [id])?;
            if affected == 0 {
                anyhow::bail!("Beneficiary {} not found", id);
            }
            Ok(())
        })?;
        log::info!("Deactivated beneficiary {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{TimeZone, Utc};

    use crate::db::Db;
    use crate::identity::{
        Beneficiary, BeneficiaryProfile, BeneficiarySubtype, FamilyProfile, IndividualProfile,
    };

    fn individual(first: &str, dpi: Option<&str>) -> Beneficiary {
        Beneficiary::new(BeneficiaryProfile::Individual(IndividualProfile {
            first_name: first.to_string(),
            last_name: "Caal".to_string(),
            dpi: dpi.map(str::to_string),
            ..Default::default()
        }))
    }

    #[test]
    fn save_and_load_resolves_profile() -> Result<()> {
        let db = Db::open_memory()?;
        let saved = db.save_beneficiary(&individual("Rosa", Some("1234 5678 0101")))?;
        assert!(!saved.id.is_empty());
        assert!(saved.registered_at.is_some());

        let loaded = db.get_beneficiary(&saved.id)?.expect("saved beneficiary");
        assert_eq!(loaded.subtype(), BeneficiarySubtype::Individual);
        match &loaded.profile {
            BeneficiaryProfile::Individual(p) => {
                assert_eq!(p.beneficiary_id, saved.id);
                assert_eq!(p.dpi.as_deref(), Some("1234 5678 0101"));
            }
            other => panic!("unexpected profile {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn editing_keeps_one_profile_row() -> Result<()> {
        let db = Db::open_memory()?;
        let saved = db.save_beneficiary(&individual("Rosa", Some("111")))?;

        let mut edited = individual("Rosa María", Some("111"));
        edited.id = saved.id.clone();
        db.save_beneficiary(&edited)?;

        let candidates = db.identity_candidates(BeneficiarySubtype::Individual)?;
        assert_eq!(candidates.len(), 1);
        Ok(())
    }

    #[test]
    fn changing_subtype_replaces_profile() -> Result<()> {
        let db = Db::open_memory()?;
        let saved = db.save_beneficiary(&individual("Rosa", Some("111")))?;

        let mut family = Beneficiary::new(BeneficiaryProfile::Family(FamilyProfile {
            family_name: "Familia Caal".to_string(),
            head_of_household: "Rosa Caal".to_string(),
            dpi_jefe_familia: Some("111".to_string()),
            member_count: 5,
            ..Default::default()
        }));
        family.id = saved.id.clone();
        db.save_beneficiary(&family)?;

        assert!(db.identity_candidates(BeneficiarySubtype::Individual)?.is_empty());
        let loaded = db.get_beneficiary(&saved.id)?.expect("saved beneficiary");
        assert_eq!(loaded.subtype(), BeneficiarySubtype::Family);
        Ok(())
    }

    #[test]
    fn deactivate_unknown_is_an_error() -> Result<()> {
        let db = Db::open_memory()?;
        assert!(db.deactivate_beneficiary("missing").is_err());
        Ok(())
    }

    #[test]
    fn editing_without_a_date_keeps_the_registration_date() -> Result<()> {
        let db = Db::open_memory()?;
        let registered = Utc.with_ymd_and_hms(2023, 3, 8, 14, 0, 0).unwrap();
        let mut rosa = individual("Rosa", Some("111"));
        rosa.registered_at = Some(registered);
        let saved = db.save_beneficiary(&rosa)?;

        let mut edited = individual("Rosa María", Some("111"));
        edited.id = saved.id.clone();
        assert_eq!(edited.registered_at, None);
        let resaved = db.save_beneficiary(&edited)?;
        assert_eq!(resaved.registered_at, Some(registered));

        let loaded = db.get_beneficiary(&saved.id)?.expect("saved beneficiary");
        assert_eq!(loaded.registered_at, Some(registered));
        Ok(())
    }

    #[test]
    fn reads_work_while_another_reader_holds_the_connection() -> Result<()> {
        let db = Db::open_memory()?;
        let saved = db.save_beneficiary(&individual("Rosa", Some("1234-5678")))?;

        let _reader = db.read_guard();
        assert!(db.get_beneficiary(&saved.id)?.is_some());
        assert_eq!(db.identity_candidates(BeneficiarySubtype::Individual)?.len(), 1);
        let conflict = db.find_identity_conflict(BeneficiarySubtype::Individual, Some("12345678"), None)?;
        assert_eq!(conflict.map(|c| c.beneficiary_id), Some(saved.id));
        Ok(())
    }
}
