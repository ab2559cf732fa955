//! Creates the `oauth_object` table.
//!
//! Clients, authorize tokens, access tokens and client authorizations share a
//! single table keyed by `(kind, name)`. The object body is stored as JSON;
//! `uid` and `resource_version` live in their own columns so conditional
//! updates and deletes can be expressed as plain `WHERE` clauses.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OAuthObject::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(OAuthObject::Kind).string().not_null())
                    .col(ColumnDef::new(OAuthObject::Name).string().not_null())
                    .col(ColumnDef::new(OAuthObject::Uid).string().not_null())
                    .col(
                        ColumnDef::new(OAuthObject::ResourceVersion)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(OAuthObject::Data).text().not_null())
                    .col(
                        ColumnDef::new(OAuthObject::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(OAuthObject::Kind)
                            .col(OAuthObject::Name),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_oauth_object_kind")
                    .table(OAuthObject::Table)
                    .col(OAuthObject::Kind)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OAuthObject::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OAuthObject {
    Table,
    Kind,
    Name,
    Uid,
    ResourceVersion,
    Data,
    CreatedAt,
}
