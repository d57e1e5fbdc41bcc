use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{Token, TokenAction, TokenEvent};

#[async_trait]
pub trait DataInterface: Send + Sync {
    async fn init(&mut self) -> anyhow::Result<()>;

    async fn create_transaction(
        &self,
        change_source: String,
    ) -> anyhow::Result<Box<dyn DataInterfaceAccessTransaction>>;
}

/// One unit of work against the token store. Dropping it without `commit`
/// discards every change made through it.
#[async_trait]
pub trait DataInterfaceAccessTransaction: Send + Sync {
    async fn commit(&self) -> anyhow::Result<()>;
    async fn rollback(&self) -> anyhow::Result<()>;

    async fn new_token(&self, token: Token) -> anyhow::Result<Token>;

    async fn find_token_by_token(&self, token: String) -> anyhow::Result<Option<Token>>;

    /// Binds `hwid` only if the token is still unbound. Returns whether a row changed.
    async fn bind_token_hwid(&self, token: String, hwid: String) -> anyhow::Result<bool>;

    async fn clear_token_hwid(&self, token: String) -> anyhow::Result<bool>;

    async fn revoke_token(&self, token: String) -> anyhow::Result<bool>;

    async fn new_token_event(&self, token: String, action: TokenAction) -> anyhow::Result<()>;

    async fn find_token_event_by_token(&self, token: String) -> anyhow::Result<Vec<TokenEvent>>;
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataInterfaceType {
    Sqlite,
}
