use crate::errors::{AppError, AppResult};
use crate::models::{is_null_color, BackupReason, BackupRecord, Tag, TagMap};
use crate::tags::TagStore;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Oldest records are evicted past this many entries.
pub const BACKUP_RETENTION: usize = 30;

/// Immutable, newest-first snapshots of `{tags, tag_map}`. The store is
/// passive: install/daily triggers and the settings panel all just call
/// `add_backup`.
#[derive(Debug, Clone, Default)]
pub struct BackupStore {
    records: Vec<BackupRecord>,
}

impl BackupStore {
    pub fn from_records(records: Vec<BackupRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[BackupRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<BackupRecord> {
        self.records
    }

    pub fn add_backup(&mut self, reason: BackupReason, tags: &TagStore) -> &BackupRecord {
        let record = BackupRecord {
            created_at: Utc::now(),
            reason,
            tags: tags.tags().to_vec(),
            tag_map: tags.tag_map().clone(),
        };
        tracing::info!(
            reason = reason.as_str(),
            tags = record.tags.len(),
            entities = record.tag_map.len(),
            "created tag backup"
        );
        self.records.insert(0, record);
        self.records.truncate(BACKUP_RETENTION);
        &self.records[0]
    }

    /// Replaces the live tag store with deep copies from the selected
    /// record, snapshotting the pre-restore state first so the restore is
    /// itself reversible. The index refers to the list as it was when the
    /// caller read it.
    pub fn restore(&mut self, index: usize, tags: &mut TagStore) -> AppResult<()> {
        let record = self
            .records
            .get(index)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("No backup at index {index}")))?;

        self.add_backup(BackupReason::PreRestore, tags);
        tags.replace(sanitize_tags(record.tags), dedupe_tag_map(record.tag_map));
        tracing::info!(index, reason = record.reason.as_str(), "restored tag backup");
        Ok(())
    }

    /// Launch hook: an `install` snapshot the first time ever, a `daily`
    /// one when no record exists from the current UTC day.
    pub fn auto_backup_on_launch(&mut self, tags: &TagStore) -> Option<BackupReason> {
        if self.records.is_empty() {
            self.add_backup(BackupReason::Install, tags);
            return Some(BackupReason::Install);
        }
        let newest = self.records.first().expect("non-empty");
        if newest.created_at.date_naive() < Utc::now().date_naive() {
            self.add_backup(BackupReason::Daily, tags);
            return Some(BackupReason::Daily);
        }
        None
    }
}

/// Dropdown label, matching the settings panel format.
pub fn backup_label(record: &BackupRecord) -> String {
    format!(
        "{} — {}  [{} tags, {} entities]",
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        record.reason.as_str(),
        record.tags.len(),
        record.tag_map.len()
    )
}

fn sanitize_tags(tags: Vec<Tag>) -> Vec<Tag> {
    tags.into_iter()
        .map(|mut tag| {
            if is_null_color(&tag.color) {
                tag.color = String::new();
            }
            if is_null_color(&tag.color2) {
                tag.color2 = String::new();
            }
            tag
        })
        .collect()
}

fn dedupe_tag_map(tag_map: TagMap) -> TagMap {
    tag_map
        .into_iter()
        .map(|(entity_id, assigned)| {
            let mut seen = std::collections::HashSet::new();
            let assigned = assigned.into_iter().filter(|id| seen.insert(id.clone())).collect();
            (entity_id, assigned)
        })
        .collect()
}

// ─── Export / import files ──────────────────────────────────────────────────

pub fn export_tags_file(dir: &Path, tags: &TagStore, now: DateTime<Utc>) -> AppResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("tags_backup_{}.json", now.format("%Y-%m-%d")));
    let payload = serde_json::json!({ "tags": tags.tags(), "tag_map": tags.tag_map() });
    fs::write(&path, serde_json::to_vec_pretty(&payload)?)?;
    Ok(path)
}

pub fn import_tags_file(path: &Path) -> AppResult<(Vec<Tag>, TagMap)> {
    let raw = fs::read_to_string(path)?;
    parse_tag_backup(&raw)
}

/// Validates the `{tags: [...], tag_map: {...}}` shape and rebuilds typed
/// records, dropping entries that cannot be salvaged. Invalid files reject
/// without touching anything.
pub fn parse_tag_backup(raw: &str) -> AppResult<(Vec<Tag>, TagMap)> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|_| AppError::Validation("Invalid tag backup file".to_string()))?;
    let tags_value = value
        .get("tags")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Validation("Tag backup is missing a tags list".to_string()))?;
    let map_value = value
        .get("tag_map")
        .and_then(Value::as_object)
        .ok_or_else(|| AppError::Validation("Tag backup is missing a tag_map object".to_string()))?;

    let mut tags = Vec::with_capacity(tags_value.len());
    let mut dropped = 0usize;
    for entry in tags_value {
        match Tag::from_backup_value(entry) {
            Some(tag) => tags.push(tag),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::warn!(dropped, "tag backup contained unusable tag entries");
    }

    let mut tag_map = TagMap::new();
    for (entity_id, assigned) in map_value {
        let Some(list) = assigned.as_array() else {
            continue;
        };
        let mut seen = std::collections::HashSet::new();
        let assigned = list
            .iter()
            .filter_map(Value::as_str)
            .filter(|id| seen.insert(id.to_string()))
            .map(str::to_string)
            .collect::<Vec<_>>();
        tag_map.insert(entity_id.clone(), assigned);
    }

    Ok((tags, tag_map))
}

#[cfg(test)]
mod tests {
    use super::{backup_label, parse_tag_backup, BackupStore, BACKUP_RETENTION};
    use crate::errors::AppError;
    use crate::models::{BackupReason, FolderType};
    use crate::tags::TagStore;

    fn store_with_tag(name: &str) -> TagStore {
        let mut tags = TagStore::default();
        let id = tags.create_tag(name).expect("create tag").id.clone();
        tags.assign_tag("alice.png", &id).expect("assign");
        tags
    }

    #[test]
    fn backups_are_newest_first_and_capped() {
        let tags = store_with_tag("Comedy");
        let mut backups = BackupStore::default();
        for _ in 0..(BACKUP_RETENTION + 5) {
            backups.add_backup(BackupReason::Manual, &tags);
        }
        assert_eq!(backups.records().len(), BACKUP_RETENTION);
        let record = backups.add_backup(BackupReason::Daily, &tags);
        assert_eq!(record.reason, BackupReason::Daily);
        assert_eq!(backups.records()[0].reason, BackupReason::Daily);
    }

    #[test]
    fn restore_round_trips_through_a_pre_restore_snapshot() {
        let mut tags = store_with_tag("Comedy");
        let mut backups = BackupStore::default();
        backups.add_backup(BackupReason::Manual, &tags);
        let snapshot_tags = tags.tags().to_vec();
        let snapshot_map = tags.tag_map().clone();

        // Diverge, then restore the manual backup.
        let drama = tags.create_tag("Drama").expect("create").id.clone();
        tags.assign_tag("bob.png", &drama).expect("assign");
        backups.restore(0, &mut tags).expect("restore");

        assert_eq!(tags.tags(), snapshot_tags.as_slice());
        assert_eq!(tags.tag_map(), &snapshot_map);
        assert_eq!(backups.records()[0].reason, BackupReason::PreRestore);

        // Restoring the pre-restore snapshot brings the diverged state back.
        backups.restore(0, &mut tags).expect("restore pre-restore");
        assert!(tags.tag(&drama).is_some());
        assert_eq!(tags.assigned_tag_ids("bob.png"), [drama]);
    }

    #[test]
    fn restore_out_of_range_mutates_nothing() {
        let mut tags = store_with_tag("Comedy");
        let mut backups = BackupStore::default();
        let before = tags.tags().to_vec();
        let err = backups.restore(3, &mut tags).expect_err("must reject");
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(tags.tags(), before.as_slice());
        assert!(backups.records().is_empty());
    }

    #[test]
    fn launch_backup_is_install_first_then_daily() {
        let tags = store_with_tag("Comedy");
        let mut backups = BackupStore::default();
        assert_eq!(backups.auto_backup_on_launch(&tags), Some(BackupReason::Install));
        // A second launch on the same day does nothing.
        assert_eq!(backups.auto_backup_on_launch(&tags), None);
        assert_eq!(backups.records().len(), 1);
    }

    #[test]
    fn parse_rejects_malformed_shapes() {
        assert!(matches!(
            parse_tag_backup("not json"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            parse_tag_backup(r#"{"tags": {}, "tag_map": {}}"#),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            parse_tag_backup(r#"{"tags": [], "tag_map": []}"#),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn parse_normalizes_colors_folder_type_and_duplicates() {
        let raw = r##"{
            "tags": [
                {"id": "t1", "name": "Comedy", "color": "#", "color2": " ", "folder_type": "bogus"},
                {"name": "no id"},
                {"id": "t2", "name": "Drama", "color": "#ff0000", "folder_type": "OPEN"}
            ],
            "tag_map": {
                "alice.png": ["t1", "t1", "t2"],
                "broken": "not a list"
            }
        }"##;
        let (tags, tag_map) = parse_tag_backup(raw).expect("parse");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].color, "");
        assert_eq!(tags[0].color2, "");
        assert_eq!(tags[0].folder_type, FolderType::None);
        assert_eq!(tags[1].color, "#ff0000");
        assert_eq!(tags[1].folder_type, FolderType::Open);
        assert_eq!(tag_map.get("alice.png").expect("entry"), &["t1", "t2"]);
        assert!(tag_map.get("broken").is_none());
    }

    #[test]
    fn label_summarizes_a_record() {
        let tags = store_with_tag("Comedy");
        let mut backups = BackupStore::default();
        let record = backups.add_backup(BackupReason::Manual, &tags).clone();
        let label = backup_label(&record);
        assert!(label.contains("manual"));
        assert!(label.contains("[1 tags, 1 entities]"));
    }
}
