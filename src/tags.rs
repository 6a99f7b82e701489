use crate::errors::{AppError, AppResult};
use crate::models::{is_null_color, FolderType, Tag, TagMap, TagSortMode};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Flat tag records plus the entity -> tag-id assignment map. The two are
/// mutated together so assignment lists never reference a tag that is gone.
#[derive(Debug, Clone, Default)]
pub struct TagStore {
    tags: Vec<Tag>,
    tag_map: TagMap,
}

impl TagStore {
    pub fn from_parts(tags: Vec<Tag>, tag_map: TagMap) -> Self {
        Self { tags, tag_map }
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn tag_map(&self) -> &TagMap {
        &self.tag_map
    }

    pub fn into_parts(self) -> (Vec<Tag>, TagMap) {
        (self.tags, self.tag_map)
    }

    pub fn tag(&self, tag_id: &str) -> Option<&Tag> {
        self.tags.iter().find(|tag| tag.id == tag_id)
    }

    fn tag_mut(&mut self, tag_id: &str) -> AppResult<&mut Tag> {
        self.tags
            .iter_mut()
            .find(|tag| tag.id == tag_id)
            .ok_or_else(|| AppError::NotFound(format!("No tag with id {tag_id}")))
    }

    pub fn assigned_tag_ids(&self, entity_id: &str) -> &[String] {
        self.tag_map.get(entity_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn assigned_tag_names(&self, entity_id: &str) -> Vec<String> {
        self.assigned_tag_ids(entity_id)
            .iter()
            .filter_map(|tag_id| self.tag(tag_id).map(|tag| tag.name.clone()))
            .collect()
    }

    pub fn create_tag(&mut self, name: &str) -> AppResult<&Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Tag name must not be empty".to_string()));
        }
        let tag = Tag {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            color: String::new(),
            color2: String::new(),
            folder_type: FolderType::None,
        };
        tracing::info!(tag_id = %tag.id, name = %tag.name, "created tag");
        self.tags.push(tag);
        Ok(self.tags.last().expect("just pushed"))
    }

    pub fn rename_tag(&mut self, tag_id: &str, name: &str) -> AppResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Tag name must not be empty".to_string()));
        }
        self.tag_mut(tag_id)?.name = name.to_string();
        Ok(())
    }

    pub fn set_tag_colors(&mut self, tag_id: &str, color: &str, color2: &str) -> AppResult<()> {
        let tag = self.tag_mut(tag_id)?;
        tag.color = if is_null_color(color) { String::new() } else { color.trim().to_string() };
        tag.color2 = if is_null_color(color2) { String::new() } else { color2.trim().to_string() };
        Ok(())
    }

    pub fn set_folder_type(&mut self, tag_id: &str, folder_type: FolderType) -> AppResult<()> {
        self.tag_mut(tag_id)?.folder_type = folder_type;
        Ok(())
    }

    pub fn delete_tag(&mut self, tag_id: &str) -> AppResult<()> {
        let index = self
            .tags
            .iter()
            .position(|tag| tag.id == tag_id)
            .ok_or_else(|| AppError::NotFound(format!("No tag with id {tag_id}")))?;
        let removed = self.tags.remove(index);
        for assigned in self.tag_map.values_mut() {
            assigned.retain(|id| id != tag_id);
        }
        tracing::info!(tag_id = %removed.id, name = %removed.name, "deleted tag");
        Ok(())
    }

    /// Every entity holding any source tag gains the target exactly once,
    /// then the sources are deleted and stripped everywhere. Unknown source
    /// ids are skipped; a missing target rejects the whole operation.
    pub fn merge_tags(&mut self, source_ids: &[String], target_id: &str) -> AppResult<usize> {
        if self.tag(target_id).is_none() {
            return Err(AppError::NotFound(format!("No tag with id {target_id}")));
        }

        let mut sources = HashSet::new();
        for source_id in source_ids {
            if source_id == target_id {
                continue;
            }
            if self.tag(source_id).is_some() {
                sources.insert(source_id.as_str());
            } else {
                tracing::warn!(tag_id = %source_id, "merge source does not exist, skipping");
            }
        }

        let mut touched = 0usize;
        for assigned in self.tag_map.values_mut() {
            if !assigned.iter().any(|id| sources.contains(id.as_str())) {
                continue;
            }
            assigned.retain(|id| !sources.contains(id.as_str()));
            if !assigned.iter().any(|id| id == target_id) {
                assigned.push(target_id.to_string());
            }
            touched += 1;
        }

        self.tags.retain(|tag| !sources.contains(tag.id.as_str()));
        tracing::info!(target_id, merged = sources.len(), touched, "merged tags");
        Ok(touched)
    }

    /// Idempotent: returns false when the tag was already assigned.
    pub fn assign_tag(&mut self, entity_id: &str, tag_id: &str) -> AppResult<bool> {
        if self.tag(tag_id).is_none() {
            return Err(AppError::NotFound(format!("No tag with id {tag_id}")));
        }
        let assigned = self.tag_map.entry(entity_id.to_string()).or_default();
        if assigned.iter().any(|id| id == tag_id) {
            return Ok(false);
        }
        assigned.push(tag_id.to_string());
        Ok(true)
    }

    /// Drops an entity's whole assignment entry, used once the host has
    /// confirmed the entity itself is gone.
    pub fn remove_entity(&mut self, entity_id: &str) -> bool {
        self.tag_map.remove(entity_id).is_some()
    }

    pub fn remove_tag_from_entity(&mut self, tag_id: &str, entity_id: &str) -> bool {
        let Some(assigned) = self.tag_map.get_mut(entity_id) else {
            return false;
        };
        let before = assigned.len();
        assigned.retain(|id| id != tag_id);
        assigned.len() != before
    }

    pub fn usage_counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> =
            self.tags.iter().map(|tag| (tag.id.clone(), 0)).collect();
        for assigned in self.tag_map.values() {
            for tag_id in assigned {
                if let Some(count) = counts.get_mut(tag_id) {
                    *count += 1;
                }
            }
        }
        counts
    }

    /// Defensive sweep: drops assignment entries for entities that no longer
    /// exist and tag ids that no longer exist. Safe to call repeatedly.
    pub fn clean_tag_map(&mut self, live_entity_ids: &HashSet<String>) {
        let before = self.tag_map.len();
        self.tag_map.retain(|entity_id, _| live_entity_ids.contains(entity_id));
        let dropped_entities = before - self.tag_map.len();

        let valid: HashSet<&str> = self.tags.iter().map(|tag| tag.id.as_str()).collect();
        let mut dropped_ids = 0usize;
        for assigned in self.tag_map.values_mut() {
            let before = assigned.len();
            assigned.retain(|tag_id| valid.contains(tag_id.as_str()));
            dropped_ids += before - assigned.len();
        }

        if dropped_entities > 0 || dropped_ids > 0 {
            tracing::debug!(dropped_entities, dropped_ids, "cleaned tag map");
        }
    }

    pub fn replace(&mut self, tags: Vec<Tag>, tag_map: TagMap) {
        self.tags = tags;
        self.tag_map = tag_map;
    }
}

// ─── Tag section filter ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TagTerm {
    Name(String),
    Character(String),
}

/// The tag list search: comma-separated OR groups, whitespace-AND within a
/// group; a `c:` prefix matches tags assigned to a character whose name
/// contains the text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagFilter {
    groups: Vec<Vec<TagTerm>>,
}

impl TagFilter {
    pub fn parse(input: &str) -> Self {
        let groups = input
            .split(',')
            .map(|group| {
                group
                    .split_whitespace()
                    .filter_map(|raw| {
                        let lowered = raw.to_lowercase();
                        if let Some(rest) = lowered.strip_prefix("c:") {
                            if rest.is_empty() {
                                return None;
                            }
                            return Some(TagTerm::Character(rest.to_string()));
                        }
                        Some(TagTerm::Name(lowered))
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|terms| !terms.is_empty())
            .collect();
        Self { groups }
    }

    pub fn matches(&self, tag_name: &str, assigned_character_names: &[String]) -> bool {
        if self.groups.is_empty() {
            return true;
        }
        let tag_name = tag_name.to_lowercase();
        let characters = assigned_character_names
            .iter()
            .map(|name| name.to_lowercase())
            .collect::<Vec<_>>();
        self.groups.iter().any(|group| {
            group.iter().all(|term| match term {
                TagTerm::Name(text) => tag_name.contains(text),
                TagTerm::Character(text) => characters.iter().any(|name| name.contains(text)),
            })
        })
    }
}

/// Applies the tag section's sort dropdown: the count and folder-type modes
/// filter as well as order.
pub fn sort_tags<'a>(
    mut tags: Vec<&'a Tag>,
    counts: &BTreeMap<String, usize>,
    mode: TagSortMode,
) -> Vec<&'a Tag> {
    let count_of = |tag: &Tag| counts.get(&tag.id).copied().unwrap_or(0);
    match mode {
        TagSortMode::OnlyZero => tags.retain(|tag| count_of(tag) == 0),
        TagSortMode::NoFolder => tags.retain(|tag| tag.folder_type == FolderType::None),
        TagSortMode::OpenFolder => tags.retain(|tag| tag.folder_type == FolderType::Open),
        TagSortMode::ClosedFolder => tags.retain(|tag| tag.folder_type == FolderType::Closed),
        _ => {}
    }
    match mode {
        TagSortMode::AlphaDesc => {
            tags.sort_by(|a, b| b.name.to_lowercase().cmp(&a.name.to_lowercase()));
        }
        TagSortMode::CountDesc => tags.sort_by(|a, b| count_of(b).cmp(&count_of(a))),
        TagSortMode::CountAsc => tags.sort_by(|a, b| count_of(a).cmp(&count_of(b))),
        _ => tags.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase())),
    }
    tags
}
