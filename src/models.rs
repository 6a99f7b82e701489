use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Entity id -> ordered list of assigned tag ids.
pub type TagMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FolderType {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl FolderType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }

    pub fn parse_lenient(value: &str) -> Self {
        match value {
            "OPEN" => Self::Open,
            "CLOSED" => Self::Closed,
            _ => Self::None,
        }
    }
}

/// A color is "unset" when it is empty, whitespace, or a lone `#` left
/// behind by the host's color picker.
pub fn is_null_color(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed == "#"
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub color2: String,
    #[serde(default)]
    pub folder_type: FolderType,
}

impl Tag {
    /// Rebuild a tag from untrusted backup JSON: unset colors collapse to
    /// empty strings and unknown folder_type values fall back to NONE.
    /// Entries without a string id are unusable.
    pub fn from_backup_value(value: &Value) -> Option<Self> {
        let id = value.get("id")?.as_str()?;
        if id.is_empty() {
            return None;
        }
        let name = value.get("name").and_then(Value::as_str).unwrap_or("");
        let color = normalize_color(value.get("color"));
        let color2 = normalize_color(value.get("color2"));
        let folder_type = value
            .get("folder_type")
            .and_then(Value::as_str)
            .map(FolderType::parse_lenient)
            .unwrap_or_default();
        Some(Self {
            id: id.to_string(),
            name: name.to_string(),
            color,
            color2,
            folder_type,
        })
    }
}

fn normalize_color(value: Option<&Value>) -> String {
    match value.and_then(Value::as_str) {
        Some(raw) if !is_null_color(raw) => raw.trim().to_string(),
        _ => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub char_ids: Vec<String>,
    #[serde(default)]
    pub collapsed: bool,
}

/// One row of the flattened folder selection tree; `name` carries the
/// depth indentation prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderOption {
    pub id: String,
    pub name: String,
}

// ─── Backups ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupReason {
    Install,
    Daily,
    Manual,
    PreRestore,
}

impl BackupReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Daily => "daily",
            Self::Manual => "manual",
            Self::PreRestore => "pre-restore",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    pub reason: BackupReason,
    pub tags: Vec<Tag>,
    pub tag_map: TagMap,
}

// ─── Entities ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Character,
    Group,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Group => "group",
        }
    }
}

/// The uniform read view over characters and groups; character ids are the
/// avatar filename, group ids are host-assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Character {
    pub avatar: String,
    pub name: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Character {
    /// Every plain string field of the card, joined for `a:` searches.
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.avatar.as_str(), self.name.as_str()];
        parts.extend(self.fields.values().filter_map(Value::as_str));
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

// ─── List views ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySortMode {
    #[default]
    AlphaAsc,
    AlphaDesc,
    TagCountDesc,
    TagCountAsc,
    OnlyZero,
    WithNotes,
    WithoutNotes,
    NoFolder,
    WithFolder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagSortMode {
    #[default]
    AlphaAsc,
    AlphaDesc,
    CountDesc,
    CountAsc,
    OnlyZero,
    NoFolder,
    OpenFolder,
    ClosedFolder,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityFilter {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub sort: EntitySortMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityListing {
    pub entity: Entity,
    pub tag_count: usize,
    pub folder: Option<FolderOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagListing {
    pub tag: Tag,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub entity_id: String,
    pub name: String,
    pub error: Option<String>,
}

impl DeleteOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

// ─── Notes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotesFile {
    #[serde(rename = "tagNotes", default)]
    pub tag_notes: BTreeMap<String, String>,
    #[serde(rename = "charNotes", default)]
    pub char_notes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoteKind {
    Tag,
    Character,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteConflict {
    pub kind: NoteKind,
    pub id: String,
    /// The key the note arrived under, when it differs from the resolved id.
    pub import_id: Option<String>,
    pub existing: String,
    pub incoming: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotesImportOutcome {
    pub applied: usize,
    pub conflicts: Vec<NoteConflict>,
}

// ─── Persisted settings blob ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizerSettings {
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub tag_map: TagMap,
    #[serde(default)]
    pub folders: Vec<Folder>,
    #[serde(rename = "tagMapBackups", default)]
    pub tag_map_backups: Vec<BackupRecord>,
    #[serde(default)]
    pub notes: NotesFile,
}
