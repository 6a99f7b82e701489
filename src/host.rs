use crate::errors::AppResult;
use crate::models::{Character, Entity, EntityKind, Group};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HostCallFuture = Pin<Box<dyn Future<Output = AppResult<()>> + Send>>;
pub type DeleteHook = Arc<dyn Fn(Entity) -> HostCallFuture + Send + Sync>;

/// The host application's delete API. Local state only mutates after one of
/// these futures resolves Ok; a rejected deletion leaves every store
/// untouched for that entity.
#[derive(Clone)]
pub struct HostClient {
    delete_character: DeleteHook,
    delete_group: DeleteHook,
}

impl HostClient {
    pub fn new(delete_character: DeleteHook, delete_group: DeleteHook) -> Self {
        Self {
            delete_character,
            delete_group,
        }
    }

    /// Always-succeeding client for tests and headless use.
    pub fn offline() -> Self {
        let ok: DeleteHook = Arc::new(|_| Box::pin(async { Ok(()) }));
        Self {
            delete_character: ok.clone(),
            delete_group: ok,
        }
    }

    pub async fn delete_entity(&self, entity: &Entity) -> AppResult<()> {
        let hook = match entity.kind {
            EntityKind::Character => &self.delete_character,
            EntityKind::Group => &self.delete_group,
        };
        hook(entity.clone()).await
    }
}

/// Read-only view over the host's character and group collections, keyed
/// the way the host keys them: avatar filename for characters, host id for
/// groups.
#[derive(Debug, Clone, Default)]
pub struct EntitySource {
    characters: Vec<Character>,
    groups: Vec<Group>,
}

impl EntitySource {
    pub fn new(characters: Vec<Character>, groups: Vec<Group>) -> Self {
        Self { characters, groups }
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn character(&self, entity_id: &str) -> Option<&Character> {
        self.characters.iter().find(|character| character.avatar == entity_id)
    }

    /// Characters first, then groups, matching the panel's list order.
    pub fn entities(&self) -> Vec<Entity> {
        let mut entities = Vec::with_capacity(self.characters.len() + self.groups.len());
        entities.extend(self.characters.iter().map(|character| Entity {
            id: character.avatar.clone(),
            name: character.name.clone(),
            kind: EntityKind::Character,
            avatar: Some(character.avatar.clone()),
        }));
        entities.extend(self.groups.iter().map(|group| Entity {
            id: group.id.clone(),
            name: group.name.clone(),
            kind: EntityKind::Group,
            avatar: group.avatar.clone(),
        }));
        entities
    }

    pub fn entity(&self, entity_id: &str) -> Option<Entity> {
        self.entities().into_iter().find(|entity| entity.id == entity_id)
    }

    pub fn entity_ids(&self) -> HashSet<String> {
        self.entities().into_iter().map(|entity| entity.id).collect()
    }

    /// Called only after the host confirmed a deletion.
    pub fn remove(&mut self, entity_id: &str) -> Option<Entity> {
        if let Some(index) = self.characters.iter().position(|c| c.avatar == entity_id) {
            let character = self.characters.remove(index);
            return Some(Entity {
                id: character.avatar.clone(),
                name: character.name,
                kind: EntityKind::Character,
                avatar: Some(character.avatar),
            });
        }
        if let Some(index) = self.groups.iter().position(|g| g.id == entity_id) {
            let group = self.groups.remove(index);
            return Some(Entity {
                id: group.id,
                name: group.name,
                kind: EntityKind::Group,
                avatar: group.avatar,
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{EntitySource, HostClient};
    use crate::models::{Character, EntityKind, Group};

    fn source() -> EntitySource {
        EntitySource::new(
            vec![Character {
                avatar: "alice.png".to_string(),
                name: "Alice".to_string(),
                ..Character::default()
            }],
            vec![Group {
                id: "group-1".to_string(),
                name: "Book Club".to_string(),
                avatar: None,
            }],
        )
    }

    #[test]
    fn entities_list_characters_before_groups() {
        let entities = source().entities();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].kind, EntityKind::Character);
        assert_eq!(entities[0].id, "alice.png");
        assert_eq!(entities[1].kind, EntityKind::Group);
        assert_eq!(entities[1].id, "group-1");
    }

    #[test]
    fn remove_takes_either_kind_by_id() {
        let mut source = source();
        let group = source.remove("group-1").expect("group removed");
        assert_eq!(group.kind, EntityKind::Group);
        assert!(source.remove("group-1").is_none());
        assert!(source.entity("alice.png").is_some());
    }

    #[tokio::test]
    async fn offline_client_always_confirms() {
        let source = source();
        let client = HostClient::offline();
        let entity = source.entity("alice.png").expect("entity");
        client.delete_entity(&entity).await.expect("delete succeeds");
    }
}
