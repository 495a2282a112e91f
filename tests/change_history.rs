use anyhow::Result;
use chrono::{TimeZone, Utc};
use extension_records::db::{Activity, Collaborator, Community, Db, NewChange, NewEvidence, Region};
use extension_records::history::{activity_history, backfill_correlation_ids};
use extension_records::rusqlite::params;
use extension_records::RecordsConfig;

fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

struct Fixture {
    db: Db,
    activity: Activity,
    ana: Collaborator,
    beto: Collaborator,
    san_juan: Community,
}

fn fixture() -> Result<Fixture> {
    init_logging();
    let db = Db::open_memory()?;
    let region = db.save(&Region {
        name: "Alta Verapaz".to_string(),
        ..Default::default()
    })?;
    let san_juan = db.save(&Community {
        name: "San Juan".to_string(),
        region_id: Some(region.id.clone()),
        ..Default::default()
    })?;
    let activity = db.save(&Activity {
        name: "Jornada de vacunación avícola".to_string(),
        community_id: Some(san_juan.id.clone()),
        region_id: Some(region.id.clone()),
        scheduled_at: Some(Utc.with_ymd_and_hms(2024, 7, 1, 8, 0, 0).unwrap()),
        ..Default::default()
    })?;
    let ana = db.save(&Collaborator {
        name: "Ana".to_string(),
        is_staff: true,
        ..Default::default()
    })?;
    let beto = db.save(&Collaborator {
        name: "Beto".to_string(),
        is_staff: false,
        ..Default::default()
    })?;
    Ok(Fixture { db, activity, ana, beto, san_juan })
}

#[test]
fn activity_without_changes_has_empty_history() -> Result<()> {
    let f = fixture()?;
    let events = activity_history(&f.db, &f.activity.id, &RecordsConfig::default())?;
    assert!(events.is_empty());
    Ok(())
}

#[test]
fn multi_collaborator_change_reads_back_as_one_event() -> Result<()> {
    let f = fixture()?;
    f.db.record_change(&NewChange {
        activity_id: f.activity.id.clone(),
        description: "Se vacunaron 120 aves".to_string(),
        changed_at: Some(Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()),
        collaborator_ids: vec![f.ana.id.clone(), f.beto.id.clone()],
        community_id: Some(f.san_juan.id.clone()),
        evidence: vec![
            NewEvidence {
                filename: "aves.jpg".to_string(),
                storage_url: Some("/media/evidencias/aves.jpg".to_string()),
                mime_type: Some("image/jpeg".to_string()),
                description: Some("Vacunación en patio".to_string()),
            },
            NewEvidence {
                filename: "listado.pdf".to_string(),
                storage_url: Some("/media/evidencias/listado.pdf".to_string()),
                mime_type: Some("application/pdf".to_string()),
                description: None,
            },
        ],
        ..Default::default()
    })?;
    f.db.record_change(&NewChange {
        activity_id: f.activity.id.clone(),
        description: "Se reprogramó la segunda dosis".to_string(),
        changed_at: Some(Utc.with_ymd_and_hms(2024, 7, 2, 9, 30, 0).unwrap()),
        collaborator_ids: vec![f.ana.id.clone()],
        ..Default::default()
    })?;

    let config = RecordsConfig {
        staff_role_label: "Personal fijo".to_string(),
        external_role_label: "Colaborador externo".to_string(),
        ..Default::default()
    };
    let events = activity_history(&f.db, &f.activity.id, &config)?;
    assert_eq!(events.len(), 2);

    let latest = &events[0];
    assert_eq!(latest.description, "Se reprogramó la segunda dosis");
    assert_eq!(latest.member_row_ids.len(), 1);
    assert_eq!(latest.collaborator_names, "Ana");
    assert!(latest.communities.is_empty());

    let vaccination = &events[1];
    assert_eq!(vaccination.member_row_ids.len(), 2);
    assert_eq!(vaccination.primary_id, vaccination.member_row_ids[0]);
    assert_eq!(vaccination.communities, vec!["San Juan"]);
    let roles: Vec<(&str, &str)> = vaccination
        .collaborators
        .iter()
        .map(|c| (c.name.as_str(), c.role_label.as_str()))
        .collect();
    assert_eq!(roles.len(), 2);
    assert!(roles.contains(&("Ana", "Personal fijo")));
    assert!(roles.contains(&("Beto", "Colaborador externo")));
    assert_eq!(vaccination.evidence.len(), 2);
    assert_eq!(vaccination.evidence.iter().filter(|e| e.is_image).count(), 1);

    let json = serde_json::to_value(&events)?;
    assert_eq!(json[1]["community_names"], "San Juan");
    Ok(())
}

#[test]
fn rows_pointing_at_missing_entities_still_read() -> Result<()> {
    let f = fixture()?;
    f.db.transaction(|txn| {
        txn.execute(
            "INSERT INTO ActivityChange (id, activity_id, description, changed_at, correlation_id, collaborator_id, community_id, region_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                "legacy-1",
                &f.activity.id,
                "Registro importado",
                "no es una fecha",
                "legacy-1-group",
                "deleted-collaborator",
                "deleted-community",
                "deleted-region",
            ],
        )?;
        Ok(())
    })?;

    let events = activity_history(&f.db, &f.activity.id, &RecordsConfig::default())?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].changed_at, None);
    assert!(events[0].collaborators.is_empty());
    assert_eq!(events[0].collaborator_names, "");
    assert!(events[0].communities.is_empty());
    assert!(events[0].regions.is_empty());
    Ok(())
}

#[test]
fn backfill_joins_legacy_rows_from_the_same_second() -> Result<()> {
    let f = fixture()?;
    let legacy = [
        ("l1", &f.ana.id, "Entrega de semilla", "2021-09-03 10:15:42.120"),
        ("l2", &f.beto.id, "Entrega de semilla", "2021-09-03 10:15:42.870"),
        ("l3", &f.ana.id, "Entrega de semilla", "2021-09-03 10:15:43.010"),
        ("l4", &f.beto.id, "Capacitación", "2021-09-03 10:15:42.500"),
    ];
    f.db.transaction(|txn| {
        for (id, collaborator_id, description, changed_at) in &legacy {
            txn.execute(
                "INSERT INTO ActivityChange (id, activity_id, description, changed_at, correlation_id, collaborator_id)
                 VALUES (?, ?, ?, ?, uuid7(), ?)",
                params![id, &f.activity.id, description, changed_at, collaborator_id],
            )?;
        }
        Ok(())
    })?;

    let before = activity_history(&f.db, &f.activity.id, &RecordsConfig::default())?;
    assert_eq!(before.len(), 4);

    let report = backfill_correlation_ids(&f.db)?;
    assert_eq!(report.rows_examined, 4);
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].row_ids, vec!["l1", "l2"]);
    assert_eq!(report.rows_updated(), 2);

    let after = activity_history(&f.db, &f.activity.id, &RecordsConfig::default())?;
    assert_eq!(after.len(), 3);
    let merged = after
        .iter()
        .find(|e| e.member_row_ids.len() == 2)
        .expect("merged event");
    assert_eq!(merged.group_key, report.groups[0].correlation_id);
    assert_eq!(merged.collaborator_names.split(", ").count(), 2);

    // Already-correlated rows are not touched again.
    let again = backfill_correlation_ids(&f.db)?;
    assert!(again.groups.is_empty());
    assert_eq!(again.rows_examined, 2);
    Ok(())
}
