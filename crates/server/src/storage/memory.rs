use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{ObjectStore, conflict, invalid, not_found};
use crate::error::StoreError;
use crate::model::StoredObject;

/// Process-local store. Every compare-and-swap runs under the shard lock of
/// the key's map entry, so concurrent writers observe a single order.
pub struct MemoryStore<T: StoredObject> {
    objects: DashMap<String, T>,
}

impl<T: StoredObject> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }
}

impl<T: StoredObject> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: StoredObject> ObjectStore<T> for MemoryStore<T> {
    async fn get(&self, name: &str) -> Result<T, StoreError> {
        self.objects
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found::<T>(name))
    }

    async fn create(&self, mut object: T) -> Result<T, StoreError> {
        object.validate().map_err(|reason| invalid(&object, reason))?;
        let name = object.meta().name.clone();
        match self.objects.entry(name.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists { kind: T::KIND, name }),
            Entry::Vacant(slot) => {
                let meta = object.meta_mut();
                meta.uid = uuid::Uuid::new_v4().to_string();
                meta.resource_version = 1;
                slot.insert(object.clone());
                Ok(object)
            }
        }
    }

    async fn update(&self, mut object: T) -> Result<T, StoreError> {
        object.validate().map_err(|reason| invalid(&object, reason))?;
        let name = object.meta().name.clone();
        match self.objects.entry(name.clone()) {
            Entry::Vacant(_) => Err(not_found::<T>(&name)),
            Entry::Occupied(mut slot) => {
                let current = slot.get().meta();
                if current.resource_version != object.meta().resource_version {
                    return Err(conflict::<T>(&name));
                }
                let (uid, version, created) = (
                    current.uid.clone(),
                    current.resource_version,
                    current.creation_timestamp,
                );
                let meta = object.meta_mut();
                meta.uid = uid;
                meta.resource_version = version + 1;
                meta.creation_timestamp = created;
                slot.insert(object.clone());
                Ok(object)
            }
        }
    }

    async fn delete(&self, name: &str, precondition_uid: Option<&str>) -> Result<(), StoreError> {
        match self.objects.entry(name.to_owned()) {
            Entry::Vacant(_) => Err(not_found::<T>(name)),
            Entry::Occupied(slot) => {
                if let Some(uid) = precondition_uid
                    && slot.get().meta().uid != uid
                {
                    return Err(conflict::<T>(name));
                }
                slot.remove();
                Ok(())
            }
        }
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.objects.iter().map(|e| e.value().clone()).collect())
    }
}
