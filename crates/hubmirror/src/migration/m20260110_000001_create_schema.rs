//! Initial migration to create the mirror schema.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_accounts(manager).await?;
        self.create_repositories(manager).await?;
        self.create_labels(manager).await?;
        self.create_issues(manager).await?;
        self.create_issue_labels(manager).await?;
        self.create_account_repositories(manager).await?;
        self.create_organization_members(manager).await?;
        self.create_repo_assignees(manager).await?;
        self.create_cache_metadata(manager).await?;
        self.create_sync_log(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncLog::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CacheMetadata::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RepoAssignees::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OrganizationMembers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AccountRepositories::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(IssueLabels::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Issues::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Labels::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Repositories::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Accounts::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_accounts(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Accounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Accounts::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Accounts::Kind).string().not_null())
                    .col(ColumnDef::new(Accounts::Login).string().not_null())
                    .col(
                        ColumnDef::new(Accounts::ResponseTs)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Accounts::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Accounts::Token).text().null())
                    .to_owned(),
            )
            .await
    }

    async fn create_repositories(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Repositories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Repositories::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Repositories::AccountId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Repositories::Name).string().not_null())
                    .col(ColumnDef::new(Repositories::FullName).string().not_null())
                    .col(
                        ColumnDef::new(Repositories::Private)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Repositories::HasIssues)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Repositories::ResponseTs)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_labels(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Labels::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Labels::RepositoryId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Labels::Name).string().not_null())
                    .col(ColumnDef::new(Labels::Color).string().not_null())
                    .primary_key(
                        Index::create()
                            .col(Labels::RepositoryId)
                            .col(Labels::Name),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_issues(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Issues::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Issues::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Issues::RepositoryId).big_integer().not_null())
                    .col(ColumnDef::new(Issues::Number).big_integer().not_null())
                    .col(ColumnDef::new(Issues::State).string().not_null())
                    .col(ColumnDef::new(Issues::Title).string().not_null())
                    .col(ColumnDef::new(Issues::Body).text().null())
                    .col(ColumnDef::new(Issues::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Issues::AssigneeId).big_integer().null())
                    .col(
                        ColumnDef::new(Issues::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Issues::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Issues::ClosedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Issues::ResponseTs)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_issues_repository")
                    .table(Issues::Table)
                    .col(Issues::RepositoryId)
                    .to_owned(),
            )
            .await
    }

    async fn create_issue_labels(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IssueLabels::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(IssueLabels::IssueId).big_integer().not_null())
                    .col(ColumnDef::new(IssueLabels::Name).string().not_null())
                    .col(ColumnDef::new(IssueLabels::Color).string().not_null())
                    .primary_key(
                        Index::create()
                            .col(IssueLabels::IssueId)
                            .col(IssueLabels::Name),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_account_repositories(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AccountRepositories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AccountRepositories::AccountId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AccountRepositories::RepositoryId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AccountRepositories::Admin)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .primary_key(
                        Index::create()
                            .col(AccountRepositories::AccountId)
                            .col(AccountRepositories::RepositoryId),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_organization_members(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OrganizationMembers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrganizationMembers::OrganizationId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OrganizationMembers::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OrganizationMembers::Admin)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .primary_key(
                        Index::create()
                            .col(OrganizationMembers::OrganizationId)
                            .col(OrganizationMembers::UserId),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_repo_assignees(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RepoAssignees::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RepoAssignees::RepositoryId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RepoAssignees::AccountId)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(RepoAssignees::RepositoryId)
                            .col(RepoAssignees::AccountId),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_cache_metadata(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CacheMetadata::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CacheMetadata::IdentityId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(CacheMetadata::Slot).string().not_null())
                    .col(ColumnDef::new(CacheMetadata::Etag).text().null())
                    .col(
                        ColumnDef::new(CacheMetadata::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(CacheMetadata::IdentityId)
                            .col(CacheMetadata::Slot),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_sync_log(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncLog::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncLog::RootKind).string().not_null())
                    .col(ColumnDef::new(SyncLog::RootId).big_integer().not_null())
                    .col(ColumnDef::new(SyncLog::EntityKind).string().not_null())
                    .col(ColumnDef::new(SyncLog::EntityId).big_integer().not_null())
                    .col(ColumnDef::new(SyncLog::RowVersion).big_integer().not_null())
                    .primary_key(
                        Index::create()
                            .col(SyncLog::RootKind)
                            .col(SyncLog::RootId)
                            .col(SyncLog::EntityKind)
                            .col(SyncLog::EntityId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_log_root_version")
                    .table(SyncLog::Table)
                    .col(SyncLog::RootKind)
                    .col(SyncLog::RootId)
                    .col(SyncLog::RowVersion)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum Accounts {
    Table,
    Id,
    Kind,
    Login,
    ResponseTs,
    Active,
    Token,
}

#[derive(DeriveIden)]
enum Repositories {
    Table,
    Id,
    AccountId,
    Name,
    FullName,
    Private,
    HasIssues,
    ResponseTs,
}

#[derive(DeriveIden)]
enum Labels {
    Table,
    RepositoryId,
    Name,
    Color,
}

#[derive(DeriveIden)]
enum Issues {
    Table,
    Id,
    RepositoryId,
    Number,
    State,
    Title,
    Body,
    UserId,
    AssigneeId,
    CreatedAt,
    UpdatedAt,
    ClosedAt,
    ResponseTs,
}

#[derive(DeriveIden)]
enum IssueLabels {
    Table,
    IssueId,
    Name,
    Color,
}

#[derive(DeriveIden)]
enum AccountRepositories {
    Table,
    AccountId,
    RepositoryId,
    Admin,
}

#[derive(DeriveIden)]
enum OrganizationMembers {
    Table,
    OrganizationId,
    UserId,
    Admin,
}

#[derive(DeriveIden)]
enum RepoAssignees {
    Table,
    RepositoryId,
    AccountId,
}

#[derive(DeriveIden)]
enum CacheMetadata {
    Table,
    IdentityId,
    Slot,
    Etag,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum SyncLog {
    Table,
    RootKind,
    RootId,
    EntityKind,
    EntityId,
    RowVersion,
}
