use crate::db::errors::Result;
use async_trait::async_trait;

/// CRUD surface shared by the simple resource repositories.
///
/// Repositories borrow a connection (or an open transaction) for their lifetime, so callers
/// decide the transaction boundary.
#[async_trait]
pub trait Repository {
    type CreateRequest;
    type UpdateRequest;
    type Response;
    type Id;
    type Filter;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;

    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;

    async fn delete(&mut self, id: Self::Id) -> Result<bool>;
}
