//! Storage collaborator contract.

use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::Credential;
use crate::error::StoreError;
use crate::task::{CompletionChange, FieldPatch, Task};

/// CRUD over task records, scoped to the credential's user.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_all(&self, credential: &Credential) -> Result<Vec<Task>, StoreError>;

    async fn create(&self, credential: &Credential, task: Task) -> Result<Task, StoreError>;

    async fn update_completion(
        &self,
        credential: &Credential,
        uuid: Uuid,
        change: CompletionChange,
    ) -> Result<Task, StoreError>;

    async fn update_fields(
        &self,
        credential: &Credential,
        uuid: Uuid,
        patch: FieldPatch,
    ) -> Result<Task, StoreError>;

    async fn delete(&self, credential: &Credential, uuid: Uuid) -> Result<(), StoreError>;

    async fn fetch(&self, credential: &Credential, uuid: Uuid) -> Result<Task, StoreError> {
        self.list_all(credential)
            .await?
            .into_iter()
            .find(|task| task.uuid == uuid)
            .ok_or(StoreError::NotFound(uuid))
    }
}
