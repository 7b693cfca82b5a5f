//! # Subject Resolution
//!
//! Lookup of the users and repositories permission sync jobs target. The
//! account and repository stores own these rows; the queue only reads them.

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};

use crate::error::RepositoryError;
use crate::models::{Subject, repo, user};

/// Resolves job subjects to their records.
#[async_trait]
pub trait SubjectResolver: Send + Sync {
    async fn get_user_by_id(&self, id: i32) -> Result<Option<user::Model>, RepositoryError>;

    async fn get_repo_by_id(&self, id: i32) -> Result<Option<repo::Model>, RepositoryError>;

    /// Human-readable name of a subject: the repository name, or the user's
    /// display name falling back to the username. `None` when the subject is gone.
    async fn display_name(&self, subject: Subject) -> Result<Option<String>, RepositoryError> {
        match subject {
            Subject::User(id) => Ok(self.get_user_by_id(id).await?.map(|user| {
                user.display_name
                    .filter(|name| !name.is_empty())
                    .unwrap_or(user.username)
            })),
            Subject::Repo(id) => Ok(self.get_repo_by_id(id).await?.map(|repo| repo.name)),
        }
    }
}

/// Database-backed [`SubjectResolver`].
#[derive(Clone, Debug)]
pub struct SubjectRepository {
    db: DatabaseConnection,
}

impl SubjectRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubjectResolver for SubjectRepository {
    async fn get_user_by_id(&self, id: i32) -> Result<Option<user::Model>, RepositoryError> {
        user::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    async fn get_repo_by_id(&self, id: i32) -> Result<Option<repo::Model>, RepositoryError> {
        repo::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
