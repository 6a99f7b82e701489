use crate::backups::{self, BackupStore};
use crate::errors::{AppError, AppResult};
use crate::folders::FolderStore;
use crate::host::{EntitySource, HostClient};
use crate::models::{
    BackupReason, DeleteOutcome, EntityFilter, EntityKind, EntityListing, EntitySortMode,
    FolderOption, NoteConflict, NotesImportOutcome, OrganizerSettings, TagListing, TagSortMode,
};
use crate::notes::{self, NotesStore};
use crate::query::{EntityQuery, QuerySubject};
use crate::settings::SettingsStore;
use crate::tags::{sort_tags, TagFilter, TagStore};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// The facade the host panel talks to. Owns the stores, the settings blob,
/// and the host client; every cross-store operation lives here so the
/// stores stay individually consistent.
pub struct Organizer {
    settings: SettingsStore,
    tags: TagStore,
    folders: FolderStore,
    backups: BackupStore,
    notes: NotesStore,
    source: EntitySource,
    host: HostClient,
}

impl Organizer {
    pub fn open(data_dir: &Path, source: EntitySource, host: HostClient) -> AppResult<Self> {
        let settings = SettingsStore::new(data_dir);
        let blob = settings.load()?;
        let mut organizer = Self {
            tags: TagStore::from_parts(blob.tags, blob.tag_map),
            folders: FolderStore::load(blob.folders),
            backups: BackupStore::from_records(blob.tag_map_backups),
            notes: NotesStore::from_file(blob.notes),
            settings,
            source,
            host,
        };
        organizer.sweep();
        Ok(organizer)
    }

    pub fn tags(&self) -> &TagStore {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut TagStore {
        &mut self.tags
    }

    pub fn folders(&self) -> &FolderStore {
        &self.folders
    }

    pub fn folders_mut(&mut self) -> &mut FolderStore {
        &mut self.folders
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn notes(&self) -> &NotesStore {
        &self.notes
    }

    pub fn notes_mut(&mut self) -> &mut NotesStore {
        &mut self.notes
    }

    pub fn source(&self) -> &EntitySource {
        &self.source
    }

    /// Sweep + persist: the checkpoint every batch operation and section
    /// render goes through.
    pub fn checkpoint(&mut self) -> AppResult<()> {
        self.sweep();
        self.save()
    }

    fn sweep(&mut self) {
        let live = self.source.entity_ids();
        self.tags.clean_tag_map(&live);
        self.folders.retain_characters(&live);
    }

    fn save(&self) -> AppResult<()> {
        let blob = OrganizerSettings {
            tags: self.tags.tags().to_vec(),
            tag_map: self.tags.tag_map().clone(),
            folders: self.folders.folders().to_vec(),
            tag_map_backups: self.backups.records().to_vec(),
            notes: self.notes.notes().clone(),
        };
        self.settings.save(&blob)
    }

    // ─── Tag and folder batch operations ────────────────────────────────────

    /// Bulk assignment from the panel's tag chips: every named tag must
    /// exist before anything is written; unknown entities are skipped.
    pub fn assign_tags(&mut self, entity_ids: &[String], tag_ids: &[String]) -> AppResult<usize> {
        for tag_id in tag_ids {
            if self.tags.tag(tag_id).is_none() {
                return Err(AppError::NotFound(format!("No tag with id {tag_id}")));
            }
        }
        let live = self.source.entity_ids();
        let mut assigned = 0usize;
        for entity_id in entity_ids {
            if !live.contains(entity_id) {
                tracing::warn!(entity_id = %entity_id, "skipping tag assignment for unknown entity");
                continue;
            }
            for tag_id in tag_ids {
                if self.tags.assign_tag(entity_id, tag_id)? {
                    assigned += 1;
                }
            }
        }
        self.checkpoint()?;
        Ok(assigned)
    }

    /// `None` moves the entity out of every folder (back to root).
    pub fn set_entity_folder(&mut self, entity_id: &str, folder_id: Option<&str>) -> AppResult<()> {
        if self.source.entity(entity_id).is_none() {
            return Err(AppError::NotFound(format!("No entity with id {entity_id}")));
        }
        match folder_id {
            Some(folder_id) => {
                self.folders.assign_characters(folder_id, &[entity_id.to_string()])?;
            }
            None => {
                self.folders.remove_character_everywhere(entity_id);
            }
        }
        self.checkpoint()
    }

    pub fn assign_folder_bulk(
        &mut self,
        entity_ids: &[String],
        folder_id: Option<&str>,
    ) -> AppResult<usize> {
        let live = self.source.entity_ids();
        let known: Vec<String> = entity_ids
            .iter()
            .filter(|id| {
                let keep = live.contains(*id);
                if !keep {
                    tracing::warn!(entity_id = %id, "skipping folder assignment for unknown entity");
                }
                keep
            })
            .cloned()
            .collect();
        match folder_id {
            Some(folder_id) => {
                self.folders.assign_characters(folder_id, &known)?;
            }
            None => {
                for entity_id in &known {
                    self.folders.remove_character_everywhere(entity_id);
                }
            }
        }
        self.checkpoint()?;
        Ok(known.len())
    }

    /// Per-item deletion through the host API. Local state for an entity
    /// mutates only after its host call confirms; one failure never stops
    /// the rest of the batch.
    pub async fn delete_entities(&mut self, entity_ids: &[String]) -> Vec<DeleteOutcome> {
        let mut outcomes = Vec::with_capacity(entity_ids.len());
        for entity_id in entity_ids {
            let Some(entity) = self.source.entity(entity_id) else {
                outcomes.push(DeleteOutcome {
                    entity_id: entity_id.clone(),
                    name: String::new(),
                    error: Some(format!("No entity with id {entity_id}")),
                });
                continue;
            };
            let confirmed = self.host.delete_entity(&entity).await;
            match confirmed {
                Ok(()) => {
                    self.source.remove(entity_id);
                    self.tags.remove_entity(entity_id);
                    self.folders.remove_character_everywhere(entity_id);
                    self.notes.remove_entity_note(entity_id);
                    tracing::info!(entity_id = %entity_id, name = %entity.name, kind = entity.kind.as_str(), "deleted entity");
                    outcomes.push(DeleteOutcome {
                        entity_id: entity_id.clone(),
                        name: entity.name,
                        error: None,
                    });
                }
                Err(err) => {
                    tracing::warn!(entity_id = %entity_id, name = %entity.name, %err, "host rejected entity deletion");
                    outcomes.push(DeleteOutcome {
                        entity_id: entity_id.clone(),
                        name: entity.name,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        if let Err(err) = self.checkpoint() {
            tracing::warn!(%err, "checkpoint after batch delete failed");
        }
        outcomes
    }

    // ─── List views ─────────────────────────────────────────────────────────

    pub fn list_entities(&self, filter: &EntityFilter) -> Vec<EntityListing> {
        let query = EntityQuery::parse(&filter.query);
        let mut listings = Vec::new();
        for entity in self.source.entities() {
            let subject = self.subject_for(&entity.id, &entity.name, entity.kind);
            if !query.matches(&subject) {
                continue;
            }
            let folder = (entity.kind == EntityKind::Character)
                .then(|| self.folders.assigned_folder(&entity.id))
                .flatten()
                .map(|folder| FolderOption {
                    id: folder.id.clone(),
                    name: folder.name.clone(),
                });
            listings.push(EntityListing {
                tag_count: self.tags.assigned_tag_ids(&entity.id).len(),
                folder,
                entity,
            });
        }

        match filter.sort {
            EntitySortMode::OnlyZero => listings.retain(|l| l.tag_count == 0),
            EntitySortMode::WithNotes => listings.retain(|l| self.notes.has_char_note(&l.entity.id)),
            EntitySortMode::WithoutNotes => {
                listings.retain(|l| !self.notes.has_char_note(&l.entity.id));
            }
            EntitySortMode::NoFolder => {
                listings.retain(|l| l.entity.kind == EntityKind::Character && l.folder.is_none());
            }
            EntitySortMode::WithFolder => {
                listings.retain(|l| l.entity.kind == EntityKind::Character && l.folder.is_some());
            }
            _ => {}
        }

        match filter.sort {
            EntitySortMode::AlphaDesc => listings.sort_by(|a, b| {
                b.entity.name.to_lowercase().cmp(&a.entity.name.to_lowercase())
            }),
            EntitySortMode::TagCountDesc => listings.sort_by(|a, b| b.tag_count.cmp(&a.tag_count)),
            EntitySortMode::TagCountAsc => listings.sort_by(|a, b| a.tag_count.cmp(&b.tag_count)),
            EntitySortMode::AlphaAsc => listings.sort_by(|a, b| {
                a.entity.name.to_lowercase().cmp(&b.entity.name.to_lowercase())
            }),
            // The filter-style modes keep the source order.
            _ => {}
        }
        listings
    }

    pub fn list_tags(&self, raw_filter: &str, mode: TagSortMode) -> Vec<TagListing> {
        let filter = TagFilter::parse(raw_filter);
        let counts = self.tags.usage_counts();

        let names: HashMap<String, String> = self
            .source
            .entities()
            .into_iter()
            .map(|entity| (entity.id, entity.name))
            .collect();
        let mut names_by_tag: HashMap<&str, Vec<String>> = HashMap::new();
        for (entity_id, assigned) in self.tags.tag_map() {
            let Some(name) = names.get(entity_id) else {
                continue;
            };
            for tag_id in assigned {
                names_by_tag.entry(tag_id.as_str()).or_default().push(name.clone());
            }
        }

        let filtered = self
            .tags
            .tags()
            .iter()
            .filter(|tag| {
                let assigned_names = names_by_tag.get(tag.id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                filter.matches(&tag.name, assigned_names)
            })
            .collect::<Vec<_>>();

        sort_tags(filtered, &counts, mode)
            .into_iter()
            .map(|tag| TagListing {
                count: counts.get(&tag.id).copied().unwrap_or(0),
                tag: tag.clone(),
            })
            .collect()
    }

    fn subject_for(&self, entity_id: &str, name: &str, kind: EntityKind) -> QuerySubject {
        let tag_names = self.tags.assigned_tag_names(entity_id);
        let (all_fields, folder_name, is_character) = match kind {
            EntityKind::Character => (
                self.source
                    .character(entity_id)
                    .map(|character| character.searchable_text())
                    .unwrap_or_default(),
                self.folders.assigned_folder(entity_id).map(|folder| folder.name.clone()),
                true,
            ),
            EntityKind::Group => (String::new(), None, false),
        };
        QuerySubject {
            name: name.to_string(),
            all_fields,
            tag_names,
            folder_name,
            is_character,
        }
    }

    // ─── Backups, export, import ────────────────────────────────────────────

    pub fn auto_backup_on_launch(&mut self) -> AppResult<Option<BackupReason>> {
        let reason = self.backups.auto_backup_on_launch(&self.tags);
        if reason.is_some() {
            self.save()?;
        }
        Ok(reason)
    }

    pub fn add_tag_backup(&mut self, reason: BackupReason) -> AppResult<()> {
        self.backups.add_backup(reason, &self.tags);
        self.save()
    }

    pub fn restore_backup(&mut self, index: usize) -> AppResult<()> {
        self.backups.restore(index, &mut self.tags)?;
        self.checkpoint()
    }

    pub fn export_tags(&self, dir: &Path) -> AppResult<PathBuf> {
        backups::export_tags_file(dir, &self.tags, Utc::now())
    }

    /// Replaces the live tags/tag_map from an exported backup file. Invalid
    /// files reject before any mutation.
    pub fn import_tags(&mut self, path: &Path) -> AppResult<()> {
        let (tags, tag_map) = backups::import_tags_file(path)?;
        self.tags.replace(tags, tag_map);
        self.checkpoint()
    }

    pub fn export_notes(&self, dir: &Path) -> AppResult<PathBuf> {
        self.notes.export_file(dir, Utc::now())
    }

    pub fn import_notes(&mut self, path: &Path) -> AppResult<NotesImportOutcome> {
        let incoming = notes::read_notes_file(path)?;
        let known_tag_ids: HashSet<String> =
            self.tags.tags().iter().map(|tag| tag.id.clone()).collect();
        let outcome = self.notes.import(incoming, &known_tag_ids, self.source.characters());
        self.save()?;
        Ok(outcome)
    }

    pub fn resolve_note_conflicts(&mut self, accepted: &[NoteConflict]) -> AppResult<()> {
        self.notes.apply_resolutions(accepted);
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::Organizer;
    use crate::host::{EntitySource, HostClient};
    use crate::models::{Character, EntityFilter, EntitySortMode, Group, TagSortMode};
    use serde_json::json;

    fn sample_source() -> EntitySource {
        let mut alice = Character {
            avatar: "alice.png".to_string(),
            name: "Alice".to_string(),
            ..Character::default()
        };
        alice
            .fields
            .insert("description".to_string(), json!("A cheerful detective"));
        let bob = Character {
            avatar: "bob.png".to_string(),
            name: "Bob".to_string(),
            ..Character::default()
        };
        let group = Group {
            id: "group-1".to_string(),
            name: "Book Club".to_string(),
            avatar: None,
        };
        EntitySource::new(vec![alice, bob], vec![group])
    }

    fn open_organizer(dir: &std::path::Path) -> Organizer {
        Organizer::open(dir, sample_source(), HostClient::offline()).expect("open organizer")
    }

    #[test]
    fn state_survives_a_checkpoint_and_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut organizer = open_organizer(dir.path());
        let tag_id = organizer.tags_mut().create_tag("Comedy").expect("create").id.clone();
        organizer
            .assign_tags(&["alice.png".to_string()], &[tag_id.clone()])
            .expect("assign");
        organizer.folders_mut().create_folder("Fantasy", None).expect("create folder");
        organizer.checkpoint().expect("checkpoint");

        let reopened = open_organizer(dir.path());
        assert_eq!(reopened.tags().assigned_tag_ids("alice.png"), [tag_id]);
        assert!(reopened.folders().folders().iter().any(|f| f.name == "Fantasy"));
    }

    #[test]
    fn opening_sweeps_stale_assignments() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut organizer = open_organizer(dir.path());
            let tag_id = organizer.tags_mut().create_tag("Comedy").expect("create").id.clone();
            organizer
                .assign_tags(&["alice.png".to_string()], &[tag_id])
                .expect("assign");
            let folder_id = organizer
                .folders_mut()
                .create_folder("Fantasy", None)
                .expect("folder")
                .id
                .clone();
            organizer.set_entity_folder("alice.png", Some(&folder_id)).expect("assign folder");
        }

        // Alice no longer exists in the host on the next launch.
        let source = EntitySource::new(
            vec![Character {
                avatar: "bob.png".to_string(),
                name: "Bob".to_string(),
                ..Character::default()
            }],
            Vec::new(),
        );
        let organizer =
            Organizer::open(dir.path(), source, HostClient::offline()).expect("reopen");
        assert!(organizer.tags().tag_map().get("alice.png").is_none());
        assert!(organizer.folders().assigned_folder("alice.png").is_none());
    }

    #[test]
    fn list_entities_combines_query_filter_and_sort() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut organizer = open_organizer(dir.path());
        let comedy = organizer.tags_mut().create_tag("Comedy").expect("create").id.clone();
        organizer
            .assign_tags(&["alice.png".to_string()], &[comedy])
            .expect("assign");

        let all = organizer.list_entities(&EntityFilter::default());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].entity.name, "Alice");

        let tagged = organizer.list_entities(&EntityFilter {
            query: "t:comedy".to_string(),
            sort: EntitySortMode::AlphaAsc,
        });
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].entity.name, "Alice");
        assert_eq!(tagged[0].tag_count, 1);

        let by_fields = organizer.list_entities(&EntityFilter {
            query: "a:detective".to_string(),
            sort: EntitySortMode::AlphaAsc,
        });
        assert_eq!(by_fields.len(), 1);

        let zero = organizer.list_entities(&EntityFilter {
            query: String::new(),
            sort: EntitySortMode::OnlyZero,
        });
        assert!(zero.iter().all(|l| l.tag_count == 0));
        assert_eq!(zero.len(), 2);
    }

    #[test]
    fn folder_modes_only_consider_characters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut organizer = open_organizer(dir.path());
        let folder_id = organizer
            .folders_mut()
            .create_folder("Fantasy", None)
            .expect("folder")
            .id
            .clone();
        organizer.set_entity_folder("alice.png", Some(&folder_id)).expect("assign");

        let with_folder = organizer.list_entities(&EntityFilter {
            query: String::new(),
            sort: EntitySortMode::WithFolder,
        });
        assert_eq!(with_folder.len(), 1);
        assert_eq!(with_folder[0].entity.name, "Alice");
        assert_eq!(with_folder[0].folder.as_ref().expect("folder").name, "Fantasy");

        let no_folder = organizer.list_entities(&EntityFilter {
            query: String::new(),
            sort: EntitySortMode::NoFolder,
        });
        assert_eq!(no_folder.len(), 1);
        assert_eq!(no_folder[0].entity.name, "Bob");

        let by_folder_name = organizer.list_entities(&EntityFilter {
            query: "f:fanta".to_string(),
            sort: EntitySortMode::AlphaAsc,
        });
        assert_eq!(by_folder_name.len(), 1);
    }

    #[test]
    fn list_tags_supports_character_search() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut organizer = open_organizer(dir.path());
        let comedy = organizer.tags_mut().create_tag("Comedy").expect("create").id.clone();
        organizer.tags_mut().create_tag("Drama").expect("create");
        organizer
            .assign_tags(&["alice.png".to_string()], &[comedy])
            .expect("assign");

        let by_char = organizer.list_tags("c:alice", TagSortMode::AlphaAsc);
        assert_eq!(by_char.len(), 1);
        assert_eq!(by_char[0].tag.name, "Comedy");
        assert_eq!(by_char[0].count, 1);

        let all = organizer.list_tags("", TagSortMode::CountDesc);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].tag.name, "Comedy");
    }
}
