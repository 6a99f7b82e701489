use crate::errors::{AppError, AppResult};
use crate::models::{Folder, FolderOption};
use std::collections::HashSet;
use uuid::Uuid;

/// Synthetic top-level node: never a parent option, never holds charIds.
pub const ROOT_FOLDER_ID: &str = "root";

const OPTION_INDENT: &str = "  ";

/// Flat list of folders with parent links, kept in persisted order. All
/// tree-shape invariants (acyclicity, single-owner charIds, bare root) are
/// re-established on load and preserved by every mutation.
#[derive(Debug, Clone, Default)]
pub struct FolderStore {
    folders: Vec<Folder>,
}

impl FolderStore {
    pub fn load(mut folders: Vec<Folder>) -> Self {
        let mut seen_ids = HashSet::new();
        folders.retain(|folder| seen_ids.insert(folder.id.clone()));

        if !folders.iter().any(|folder| folder.id == ROOT_FOLDER_ID) {
            folders.insert(
                0,
                Folder {
                    id: ROOT_FOLDER_ID.to_string(),
                    name: "Root".to_string(),
                    parent_id: None,
                    char_ids: Vec::new(),
                    collapsed: false,
                },
            );
        }

        let ids: HashSet<String> = folders.iter().map(|folder| folder.id.clone()).collect();
        for folder in &mut folders {
            if folder.id == ROOT_FOLDER_ID {
                folder.parent_id = None;
                if !folder.char_ids.is_empty() {
                    tracing::warn!(count = folder.char_ids.len(), "root held charIds, unassigning");
                    folder.char_ids.clear();
                }
                continue;
            }
            let parent = folder.parent_id.as_deref().unwrap_or(ROOT_FOLDER_ID);
            if parent == folder.id || !ids.contains(parent) {
                tracing::warn!(folder_id = %folder.id, "folder parent missing, reparenting to root");
                folder.parent_id = Some(ROOT_FOLDER_ID.to_string());
            } else {
                folder.parent_id = Some(parent.to_string());
            }
        }

        let mut store = Self { folders };
        store.break_cycles();
        store.dedupe_char_ids();
        store
    }

    pub fn folders(&self) -> &[Folder] {
        &self.folders
    }

    pub fn into_folders(self) -> Vec<Folder> {
        self.folders
    }

    pub fn get(&self, folder_id: &str) -> Option<&Folder> {
        self.folders.iter().find(|folder| folder.id == folder_id)
    }

    fn get_mut(&mut self, folder_id: &str) -> AppResult<&mut Folder> {
        self.folders
            .iter_mut()
            .find(|folder| folder.id == folder_id)
            .ok_or_else(|| AppError::NotFound(format!("No folder with id {folder_id}")))
    }

    fn parent_id_of(&self, folder_id: &str) -> String {
        self.get(folder_id)
            .and_then(|folder| folder.parent_id.clone())
            .unwrap_or_else(|| ROOT_FOLDER_ID.to_string())
    }

    pub fn children(&self, parent_id: &str) -> Vec<&Folder> {
        self.folders
            .iter()
            .filter(|folder| {
                folder.id != ROOT_FOLDER_ID
                    && folder.parent_id.as_deref().unwrap_or(ROOT_FOLDER_ID) == parent_id
            })
            .collect()
    }

    pub fn is_descendant(&self, folder_id: &str, ancestor_id: &str) -> bool {
        let mut current = self.parent_id_of(folder_id);
        let mut hops = 0usize;
        while current != ROOT_FOLDER_ID {
            if current == ancestor_id {
                return true;
            }
            current = self.parent_id_of(&current);
            hops += 1;
            if hops > self.folders.len() {
                break;
            }
        }
        ancestor_id == ROOT_FOLDER_ID && folder_id != ROOT_FOLDER_ID
    }

    pub fn create_folder(&mut self, name: &str, parent_id: Option<&str>) -> AppResult<&Folder> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Folder name must not be empty".to_string()));
        }
        let parent = parent_id.unwrap_or(ROOT_FOLDER_ID);
        if self.get(parent).is_none() {
            return Err(AppError::NotFound(format!("No folder with id {parent}")));
        }
        let folder = Folder {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            parent_id: Some(parent.to_string()),
            char_ids: Vec::new(),
            collapsed: false,
        };
        tracing::info!(folder_id = %folder.id, name = %folder.name, parent, "created folder");
        self.folders.push(folder);
        Ok(self.folders.last().expect("just pushed"))
    }

    pub fn rename_folder(&mut self, folder_id: &str, name: &str) -> AppResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("Folder name must not be empty".to_string()));
        }
        if folder_id == ROOT_FOLDER_ID {
            return Err(AppError::Validation("The root folder cannot be renamed".to_string()));
        }
        self.get_mut(folder_id)?.name = name.to_string();
        Ok(())
    }

    pub fn set_parent(&mut self, folder_id: &str, parent_id: Option<&str>) -> AppResult<()> {
        if folder_id == ROOT_FOLDER_ID {
            return Err(AppError::Validation("The root folder cannot be moved".to_string()));
        }
        let parent = parent_id.unwrap_or(ROOT_FOLDER_ID);
        if self.get(parent).is_none() {
            return Err(AppError::NotFound(format!("No folder with id {parent}")));
        }
        if parent == folder_id || self.is_descendant(parent, folder_id) {
            return Err(AppError::Validation(
                "A folder cannot be moved into its own subtree".to_string(),
            ));
        }
        self.get_mut(folder_id)?.parent_id = Some(parent.to_string());
        Ok(())
    }

    pub fn set_collapsed(&mut self, folder_id: &str, collapsed: bool) -> AppResult<()> {
        self.get_mut(folder_id)?.collapsed = collapsed;
        Ok(())
    }

    pub fn collapse_all(&mut self) {
        self.set_collapsed_everywhere(true);
    }

    pub fn expand_all(&mut self) {
        self.set_collapsed_everywhere(false);
    }

    fn set_collapsed_everywhere(&mut self, collapsed: bool) {
        for folder in &mut self.folders {
            if folder.id != ROOT_FOLDER_ID {
                folder.collapsed = collapsed;
            }
        }
    }

    /// Children reparent to the deleted folder's parent; its directly
    /// assigned entities become unassigned and are returned.
    pub fn delete_folder(&mut self, folder_id: &str) -> AppResult<Vec<String>> {
        if folder_id == ROOT_FOLDER_ID {
            return Err(AppError::Validation("The root folder cannot be deleted".to_string()));
        }
        let index = self
            .folders
            .iter()
            .position(|folder| folder.id == folder_id)
            .ok_or_else(|| AppError::NotFound(format!("No folder with id {folder_id}")))?;
        let removed = self.folders.remove(index);
        let new_parent = removed.parent_id.clone().unwrap_or_else(|| ROOT_FOLDER_ID.to_string());
        for folder in &mut self.folders {
            if folder.parent_id.as_deref() == Some(folder_id) {
                folder.parent_id = Some(new_parent.clone());
            }
        }
        tracing::info!(
            folder_id = %removed.id,
            name = %removed.name,
            orphaned = removed.char_ids.len(),
            "deleted folder"
        );
        Ok(removed.char_ids)
    }

    /// Exclusive assignment, enforced here rather than by callers: each
    /// entity is first removed from whatever folder currently holds it.
    pub fn assign_characters(&mut self, folder_id: &str, entity_ids: &[String]) -> AppResult<usize> {
        if folder_id == ROOT_FOLDER_ID {
            return Err(AppError::Validation(
                "Characters cannot be assigned to the root folder".to_string(),
            ));
        }
        if self.get(folder_id).is_none() {
            return Err(AppError::NotFound(format!("No folder with id {folder_id}")));
        }
        let mut added = 0usize;
        for entity_id in entity_ids {
            self.remove_character_everywhere(entity_id);
            let target = self.get_mut(folder_id)?;
            if !target.char_ids.iter().any(|id| id == entity_id) {
                target.char_ids.push(entity_id.clone());
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn remove_character(&mut self, folder_id: &str, entity_id: &str) -> bool {
        let Ok(folder) = self.get_mut(folder_id) else {
            return false;
        };
        let before = folder.char_ids.len();
        folder.char_ids.retain(|id| id != entity_id);
        folder.char_ids.len() != before
    }

    /// Drops charIds whose entity no longer exists; the folder-side half of
    /// the consistency sweep.
    pub fn retain_characters(&mut self, live_entity_ids: &HashSet<String>) {
        let mut dropped = 0usize;
        for folder in &mut self.folders {
            let before = folder.char_ids.len();
            folder.char_ids.retain(|id| live_entity_ids.contains(id));
            dropped += before - folder.char_ids.len();
        }
        if dropped > 0 {
            tracing::debug!(dropped, "pruned dead charIds from folders");
        }
    }

    pub fn remove_character_everywhere(&mut self, entity_id: &str) -> bool {
        let mut removed = false;
        for folder in &mut self.folders {
            let before = folder.char_ids.len();
            folder.char_ids.retain(|id| id != entity_id);
            removed |= folder.char_ids.len() != before;
        }
        removed
    }

    /// Tree-wide owner lookup; the exclusivity invariant guarantees at most
    /// one hit.
    pub fn assigned_folder(&self, entity_id: &str) -> Option<&Folder> {
        self.folders
            .iter()
            .find(|folder| folder.char_ids.iter().any(|id| id == entity_id))
    }

    /// Pre-order flattened selection list with depth indentation. Excluded
    /// ids and their entire subtrees are omitted, which is what keeps a
    /// folder's own subtree out of its reparent options. The root label is
    /// never emitted.
    pub fn options_tree(
        &self,
        exclude_ids: &[String],
        root_id: &str,
        depth: usize,
    ) -> Vec<FolderOption> {
        let excluded: HashSet<&str> = exclude_ids.iter().map(String::as_str).collect();
        let mut options = Vec::new();
        self.collect_options(root_id, depth, &excluded, &mut options);
        options
    }

    fn collect_options(
        &self,
        node_id: &str,
        depth: usize,
        excluded: &HashSet<&str>,
        options: &mut Vec<FolderOption>,
    ) {
        if excluded.contains(node_id) {
            return;
        }
        let mut next_depth = depth;
        if node_id != ROOT_FOLDER_ID {
            let Some(folder) = self.get(node_id) else {
                return;
            };
            options.push(FolderOption {
                id: folder.id.clone(),
                name: format!("{}{}", OPTION_INDENT.repeat(depth), folder.name),
            });
            next_depth = depth + 1;
        }
        for child in self.children(node_id) {
            self.collect_options(&child.id, next_depth, excluded, options);
        }
    }

    fn break_cycles(&mut self) {
        let ids = self.folders.iter().map(|folder| folder.id.clone()).collect::<Vec<_>>();
        for id in ids {
            if id == ROOT_FOLDER_ID {
                continue;
            }
            let mut visited = HashSet::new();
            visited.insert(id.clone());
            let mut current = self.parent_id_of(&id);
            let mut cyclic = false;
            while current != ROOT_FOLDER_ID {
                if !visited.insert(current.clone()) {
                    cyclic = true;
                    break;
                }
                current = self.parent_id_of(&current);
            }
            if cyclic {
                tracing::warn!(folder_id = %id, "parent chain is cyclic, reparenting to root");
                if let Ok(folder) = self.get_mut(&id) {
                    folder.parent_id = Some(ROOT_FOLDER_ID.to_string());
                }
            }
        }
    }

    fn dedupe_char_ids(&mut self) {
        let mut seen = HashSet::new();
        for folder in &mut self.folders {
            folder.char_ids.retain(|id| seen.insert(id.clone()));
        }
    }
}

/// Folder section search: a folder matches by its own name or by the name
/// of any character assigned to it.
pub fn folder_matches(folder: &Folder, query: &str, assigned_names: &[String]) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return true;
    }
    if folder.name.to_lowercase().contains(&query) {
        return true;
    }
    assigned_names.iter().any(|name| name.to_lowercase().contains(&query))
}
