use crate::errors::{AppError, AppResult};
use crate::models::{Character, NoteConflict, NoteKind, NotesFile, NotesImportOutcome};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Free-text notes keyed by tag id and entity id, part of the persisted
/// settings blob.
#[derive(Debug, Clone, Default)]
pub struct NotesStore {
    notes: NotesFile,
}

impl NotesStore {
    pub fn from_file(notes: NotesFile) -> Self {
        Self { notes }
    }

    pub fn notes(&self) -> &NotesFile {
        &self.notes
    }

    pub fn into_file(self) -> NotesFile {
        self.notes
    }

    pub fn tag_note(&self, tag_id: &str) -> Option<&str> {
        self.notes.tag_notes.get(tag_id).map(String::as_str)
    }

    pub fn char_note(&self, entity_id: &str) -> Option<&str> {
        self.notes.char_notes.get(entity_id).map(String::as_str)
    }

    pub fn has_char_note(&self, entity_id: &str) -> bool {
        self.char_note(entity_id).map(str::trim).is_some_and(|note| !note.is_empty())
    }

    pub fn set_tag_note(&mut self, tag_id: &str, note: &str) {
        self.notes.tag_notes.insert(tag_id.to_string(), note.trim().to_string());
    }

    pub fn set_char_note(&mut self, entity_id: &str, note: &str) {
        self.notes.char_notes.insert(entity_id.to_string(), note.trim().to_string());
    }

    pub fn remove_tag_note(&mut self, tag_id: &str) {
        self.notes.tag_notes.remove(tag_id);
    }

    pub fn remove_entity_note(&mut self, entity_id: &str) {
        self.notes.char_notes.remove(entity_id);
    }

    pub fn export_file(&self, dir: &Path, now: DateTime<Utc>) -> AppResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("tag_character_notes_{}.json", now.format("%Y-%m-%d")));
        fs::write(&path, serde_json::to_vec_pretty(&self.notes)?)?;
        Ok(path)
    }

    /// Merges an imported notes file. Keys that resolve to nothing in the
    /// current stores are ignored; fresh notes apply immediately; notes
    /// that would overwrite a different existing note come back as
    /// conflicts for the caller to resolve.
    pub fn import(
        &mut self,
        incoming: NotesFile,
        known_tag_ids: &HashSet<String>,
        characters: &[Character],
    ) -> NotesImportOutcome {
        let mut outcome = NotesImportOutcome::default();

        for (tag_id, note) in incoming.tag_notes {
            if !known_tag_ids.contains(&tag_id) {
                continue;
            }
            match self.notes.tag_notes.get(&tag_id) {
                Some(existing) if existing != &note => outcome.conflicts.push(NoteConflict {
                    kind: NoteKind::Tag,
                    id: tag_id,
                    import_id: None,
                    existing: existing.clone(),
                    incoming: note,
                }),
                Some(_) => {}
                None => {
                    self.notes.tag_notes.insert(tag_id, note);
                    outcome.applied += 1;
                }
            }
        }

        for (import_key, note) in incoming.char_notes {
            let Some(resolved) = resolve_character_key(&import_key, characters) else {
                continue;
            };
            match self.notes.char_notes.get(&resolved) {
                Some(existing) if existing != &note => outcome.conflicts.push(NoteConflict {
                    kind: NoteKind::Character,
                    import_id: (import_key != resolved).then(|| import_key.clone()),
                    id: resolved,
                    existing: existing.clone(),
                    incoming: note,
                }),
                Some(_) => {}
                None => {
                    self.notes.char_notes.insert(resolved, note);
                    outcome.applied += 1;
                }
            }
        }

        outcome
    }

    /// Writes the incoming side of each accepted conflict.
    pub fn apply_resolutions(&mut self, accepted: &[NoteConflict]) {
        for conflict in accepted {
            match conflict.kind {
                NoteKind::Tag => {
                    self.notes
                        .tag_notes
                        .insert(conflict.id.clone(), conflict.incoming.clone());
                }
                NoteKind::Character => {
                    self.notes
                        .char_notes
                        .insert(conflict.id.clone(), conflict.incoming.clone());
                }
            }
        }
    }
}

/// Character note keys match by exact avatar, then avatar basename, then
/// display name, so notes survive re-imports across avatar renames.
fn resolve_character_key(import_key: &str, characters: &[Character]) -> Option<String> {
    if let Some(character) = characters.iter().find(|c| c.avatar == import_key) {
        return Some(character.avatar.clone());
    }
    let import_base = basename(import_key).to_lowercase();
    if let Some(character) = characters
        .iter()
        .find(|c| basename(&c.avatar).to_lowercase() == import_base)
    {
        return Some(character.avatar.clone());
    }
    characters
        .iter()
        .find(|c| c.name.to_lowercase() == import_key.to_lowercase())
        .map(|c| c.avatar.clone())
}

fn basename(key: &str) -> &str {
    key.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(key)
}

pub fn read_notes_file(path: &Path) -> AppResult<NotesFile> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|_| AppError::Validation("Invalid notes file".to_string()))
}

#[cfg(test)]
mod tests {
    use super::{NotesStore, resolve_character_key};
    use crate::models::{Character, NoteKind, NotesFile};
    use std::collections::HashSet;

    fn character(avatar: &str, name: &str) -> Character {
        Character {
            avatar: avatar.to_string(),
            name: name.to_string(),
            ..Character::default()
        }
    }

    fn incoming(tag: &[(&str, &str)], chars: &[(&str, &str)]) -> NotesFile {
        NotesFile {
            tag_notes: tag.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            char_notes: chars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn import_applies_new_notes_and_skips_unknown_ids() {
        let mut store = NotesStore::default();
        let known: HashSet<String> = ["t1".to_string()].into_iter().collect();
        let characters = [character("alice.png", "Alice")];

        let outcome = store.import(
            incoming(&[("t1", "funny"), ("ghost", "dropped")], &[("alice.png", "lead")]),
            &known,
            &characters,
        );

        assert_eq!(outcome.applied, 2);
        assert!(outcome.conflicts.is_empty());
        assert_eq!(store.tag_note("t1"), Some("funny"));
        assert_eq!(store.char_note("alice.png"), Some("lead"));
        assert!(store.tag_note("ghost").is_none());
    }

    #[test]
    fn import_reports_conflicts_without_overwriting() {
        let mut store = NotesStore::default();
        store.set_tag_note("t1", "old note");
        let known: HashSet<String> = ["t1".to_string()].into_iter().collect();

        let outcome = store.import(incoming(&[("t1", "new note")], &[]), &known, &[]);
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].kind, NoteKind::Tag);
        assert_eq!(store.tag_note("t1"), Some("old note"));

        store.apply_resolutions(&outcome.conflicts);
        assert_eq!(store.tag_note("t1"), Some("new note"));
    }

    #[test]
    fn character_keys_match_by_basename_and_name() {
        let characters = [character("alice.v2.png", "Alice")];
        assert_eq!(
            resolve_character_key("alice.v2.png", &characters).as_deref(),
            Some("alice.v2.png")
        );
        assert_eq!(
            resolve_character_key("ALICE.V2.webp", &characters).as_deref(),
            Some("alice.v2.png")
        );
        assert_eq!(resolve_character_key("alice", &characters).as_deref(), Some("alice.v2.png"));
        assert!(resolve_character_key("bob.png", &characters).is_none());
    }

    #[test]
    fn conflicting_character_import_records_the_original_key() {
        let mut store = NotesStore::default();
        store.set_char_note("alice.png", "old");
        let characters = [character("alice.png", "Alice")];

        let outcome = store.import(incoming(&[], &[("Alice", "new")]), &HashSet::new(), &characters);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].id, "alice.png");
        assert_eq!(outcome.conflicts[0].import_id.as_deref(), Some("Alice"));
    }
}
