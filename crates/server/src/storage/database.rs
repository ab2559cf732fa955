use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, SqlErr,
};

use super::{ObjectStore, conflict, invalid, not_found};
use crate::entity::oauth_object;
use crate::error::StoreError;
use crate::model::StoredObject;

/// SQL backed store. All kinds share the `oauth_object` table; the row's
/// `uid`, `resource_version` and `created_at` columns are authoritative over
/// whatever the JSON body says.
pub struct DatabaseStore<T: StoredObject> {
    db: Arc<DatabaseConnection>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: StoredObject> DatabaseStore<T> {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            _kind: PhantomData,
        }
    }

    fn decode(row: oauth_object::Model) -> Result<T, StoreError> {
        let mut object: T = serde_json::from_str(&row.data)?;
        let meta = object.meta_mut();
        meta.name = row.name;
        meta.uid = row.uid;
        meta.resource_version = u64::try_from(row.resource_version).unwrap_or_default();
        meta.creation_timestamp = row.created_at;
        Ok(object)
    }

    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(
            oauth_object::Entity::find_by_id((T::KIND.to_owned(), name.to_owned()))
                .one(self.db.as_ref())
                .await?
                .is_some(),
        )
    }
}

#[async_trait]
impl<T: StoredObject> ObjectStore<T> for DatabaseStore<T> {
    async fn get(&self, name: &str) -> Result<T, StoreError> {
        let row = oauth_object::Entity::find_by_id((T::KIND.to_owned(), name.to_owned()))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| not_found::<T>(name))?;
        Self::decode(row)
    }

    async fn create(&self, mut object: T) -> Result<T, StoreError> {
        object.validate().map_err(|reason| invalid(&object, reason))?;
        let meta = object.meta_mut();
        meta.uid = uuid::Uuid::new_v4().to_string();
        meta.resource_version = 1;

        let row = oauth_object::ActiveModel {
            kind: Set(T::KIND.to_owned()),
            name: Set(object.meta().name.clone()),
            uid: Set(object.meta().uid.clone()),
            resource_version: Set(1),
            data: Set(serde_json::to_string(&object)?),
            created_at: Set(object.meta().creation_timestamp),
        };

        match oauth_object::Entity::insert(row).exec(self.db.as_ref()).await {
            Ok(_) => Ok(object),
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(StoreError::AlreadyExists {
                    kind: T::KIND,
                    name: object.meta().name.clone(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update(&self, mut object: T) -> Result<T, StoreError> {
        object.validate().map_err(|reason| invalid(&object, reason))?;
        let name = object.meta().name.clone();
        let expected = i64::try_from(object.meta().resource_version)
            .map_err(|_| conflict::<T>(&name))?;
        object.meta_mut().resource_version += 1;

        let result = oauth_object::Entity::update_many()
            .col_expr(
                oauth_object::Column::Data,
                Expr::value(serde_json::to_string(&object)?),
            )
            .col_expr(
                oauth_object::Column::ResourceVersion,
                Expr::value(expected + 1),
            )
            .filter(oauth_object::Column::Kind.eq(T::KIND))
            .filter(oauth_object::Column::Name.eq(name.as_str()))
            .filter(oauth_object::Column::ResourceVersion.eq(expected))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Err(if self.exists(&name).await? {
                conflict::<T>(&name)
            } else {
                not_found::<T>(&name)
            });
        }
        // Re-read so uid and creation time come from the row.
        self.get(&name).await
    }

    async fn delete(&self, name: &str, precondition_uid: Option<&str>) -> Result<(), StoreError> {
        let mut query = oauth_object::Entity::delete_many()
            .filter(oauth_object::Column::Kind.eq(T::KIND))
            .filter(oauth_object::Column::Name.eq(name));
        if let Some(uid) = precondition_uid {
            query = query.filter(oauth_object::Column::Uid.eq(uid));
        }
        let result = query.exec(self.db.as_ref()).await?;

        if result.rows_affected == 0 {
            return Err(if precondition_uid.is_some() && self.exists(name).await? {
                conflict::<T>(name)
            } else {
                not_found::<T>(name)
            });
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<T>, StoreError> {
        oauth_object::Entity::find()
            .filter(oauth_object::Column::Kind.eq(T::KIND))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Self::decode)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OAuthClient, OAuthClientAuthorization};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> Arc<DatabaseConnection> {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        Arc::new(db)
    }

    #[tokio::test]
    async fn create_get_and_list() {
        let db = setup().await;
        let store = DatabaseStore::<OAuthClient>::new(db.clone());

        let mut client = OAuthClient::new("console");
        client.redirect_uris = vec!["https://console.example.com/cb".into()];
        let created = store.create(client).await.unwrap();
        assert_eq!(created.meta.resource_version, 1);

        let fetched = store.get("console").await.unwrap();
        assert_eq!(fetched.meta.uid, created.meta.uid);
        assert_eq!(fetched.redirect_uris, created.redirect_uris);

        // Kinds sharing the table do not see each other.
        let auths = DatabaseStore::<OAuthClientAuthorization>::new(db);
        assert!(auths.list().await.unwrap().is_empty());
        assert_eq!(store.list().await.unwrap().len(), 1);

        let dup = store.create(OAuthClient::new("console")).await.unwrap_err();
        assert!(dup.is_already_exists());
    }

    #[tokio::test]
    async fn update_is_optimistic() {
        let store = DatabaseStore::<OAuthClient>::new(setup().await);
        let created = store.create(OAuthClient::new("console")).await.unwrap();

        let mut fresh = created.clone();
        fresh.secret = "s3cret".into();
        let updated = store.update(fresh).await.unwrap();
        assert_eq!(updated.meta.resource_version, 2);
        assert_eq!(updated.secret, "s3cret");

        let stale = created;
        assert!(store.update(stale).await.unwrap_err().is_conflict());

        let missing = OAuthClient::new("ghost");
        assert!(store.update(missing).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_with_precondition() {
        let store = DatabaseStore::<OAuthClient>::new(setup().await);
        let created = store.create(OAuthClient::new("console")).await.unwrap();

        assert!(
            store
                .delete("console", Some("wrong"))
                .await
                .unwrap_err()
                .is_conflict()
        );
        store
            .delete("console", Some(&created.meta.uid))
            .await
            .unwrap();
        assert!(store.delete("console", None).await.unwrap_err().is_not_found());
    }
}
