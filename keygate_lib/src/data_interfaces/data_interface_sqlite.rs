use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Executor, FromRow, Pool, Sqlite, Transaction,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    data_interface::{DataInterface, DataInterfaceAccessTransaction},
    model::{Token, TokenAction, TokenEvent},
};

const SCHEMA: &str = include_str!("../../sqlite_sqls/schema.sql");

pub struct DataInterfaceSQLite {
    url: String,
    connection: Option<Pool<Sqlite>>,
}

impl DataInterfaceSQLite {
    pub fn new(url: String) -> Self {
        DataInterfaceSQLite {
            url,
            connection: None,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

#[async_trait]
impl DataInterface for DataInterfaceSQLite {
    async fn init(&mut self) -> anyhow::Result<()> {
        let options = SqliteConnectOptions::from_str(&self.url)?.create_if_missing(true);
        // Every connection to `:memory:` opens its own empty database, so keep exactly one alive.
        let pool_options = if self.is_in_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;
        (&pool).execute(SCHEMA).await?;
        debug!(url = %self.url, "sqlite schema ready");
        self.connection = Some(pool);
        Ok(())
    }

    async fn create_transaction(
        &self,
        change_source: String,
    ) -> anyhow::Result<Box<dyn DataInterfaceAccessTransaction>> {
        let transaction = self
            .connection
            .clone()
            .ok_or(anyhow::anyhow!("Not connected to a database!"))?
            .begin()
            .await?;

        Ok(Box::new(Arc::new(Mutex::new(
            DataInterfaceTransactionSQLite {
                transaction: Some(transaction),
                change_source,
                change_set_id: None,
            },
        ))))
    }
}

macro_rules! data_transaction {
    ($dit:ident) => {
        $dit.transaction
            .as_mut()
            .ok_or(anyhow::anyhow!("Already taken"))?
    };
}

struct DataInterfaceTransactionSQLite<'a> {
    transaction: Option<Transaction<'a, Sqlite>>,
    change_source: String,
    /// Written on the first event so read-only transactions stay read-only.
    change_set_id: Option<i64>,
}

impl DataInterfaceTransactionSQLite<'static> {
    async fn change_set_id(&mut self) -> anyhow::Result<i64> {
        if let Some(change_set_id) = self.change_set_id {
            return Ok(change_set_id);
        }
        let change_source = self.change_source.clone();
        let transaction = self
            .transaction
            .as_mut()
            .ok_or(anyhow::anyhow!("Already taken"))?;
        let change_set_id = sqlx::query(include_str!("../../sqlite_sqls/change_set/new.sql"))
            .bind(Utc::now().timestamp())
            .bind(change_source)
            .execute(transaction)
            .await?
            .last_insert_rowid();
        self.change_set_id = Some(change_set_id);
        Ok(change_set_id)
    }
}

#[derive(FromRow)]
struct TokenRecord {
    token: String,
    hwid: Option<String>,
    expires_at: Option<f64>,
    revoked: Option<i64>,
}

impl From<TokenRecord> for Token {
    fn from(record: TokenRecord) -> Self {
        Token {
            token: record.token,
            hwid: record.hwid,
            expires_at: record.expires_at,
            revoked: record.revoked.unwrap_or(0) != 0,
        }
    }
}

#[derive(FromRow)]
struct TokenEventRecord {
    token: String,
    action: String,
    change_date: Option<i64>,
    change_source: Option<String>,
}

#[async_trait]
impl DataInterfaceAccessTransaction for Arc<Mutex<DataInterfaceTransactionSQLite<'static>>> {
    async fn commit(&self) -> anyhow::Result<()> {
        self.lock()
            .await
            .transaction
            .take()
            .ok_or(anyhow::anyhow!("Already taken"))?
            .commit()
            .await?;
        Ok(())
    }

    async fn rollback(&self) -> anyhow::Result<()> {
        self.lock()
            .await
            .transaction
            .take()
            .ok_or(anyhow::anyhow!("Already taken"))?
            .rollback()
            .await?;
        Ok(())
    }

    async fn new_token(&self, token: Token) -> anyhow::Result<Token> {
        let mut data_interface_transaction = self.lock().await;
        sqlx::query(include_str!("../../sqlite_sqls/token/new.sql"))
            .bind(token.token.clone())
            .bind(token.hwid.clone())
            .bind(token.expires_at)
            .bind(token.revoked as i64)
            .execute(data_transaction!(data_interface_transaction))
            .await?;

        let token_record = sqlx::query_as::<_, TokenRecord>(include_str!(
            "../../sqlite_sqls/token/find/by_token.sql"
        ))
        .bind(token.token)
        .fetch_one(data_transaction!(data_interface_transaction))
        .await?;

        Ok(token_record.into())
    }

    async fn find_token_by_token(&self, token: String) -> anyhow::Result<Option<Token>> {
        let mut data_interface_transaction = self.lock().await;

        let possible_token_record = sqlx::query_as::<_, TokenRecord>(include_str!(
            "../../sqlite_sqls/token/find/by_token.sql"
        ))
        .bind(token)
        .fetch_optional(data_transaction!(data_interface_transaction))
        .await?;

        Ok(possible_token_record.map(Token::from))
    }

    async fn bind_token_hwid(&self, token: String, hwid: String) -> anyhow::Result<bool> {
        let mut data_interface_transaction = self.lock().await;
        let rows = sqlx::query(include_str!("../../sqlite_sqls/token/bind_hwid.sql"))
            .bind(hwid)
            .bind(token)
            .execute(data_transaction!(data_interface_transaction))
            .await?
            .rows_affected();
        Ok(rows > 0)
    }

    async fn clear_token_hwid(&self, token: String) -> anyhow::Result<bool> {
        let mut data_interface_transaction = self.lock().await;
        let rows = sqlx::query(include_str!("../../sqlite_sqls/token/clear_hwid.sql"))
            .bind(token)
            .execute(data_transaction!(data_interface_transaction))
            .await?
            .rows_affected();
        Ok(rows > 0)
    }

    async fn revoke_token(&self, token: String) -> anyhow::Result<bool> {
        let mut data_interface_transaction = self.lock().await;
        let rows = sqlx::query(include_str!("../../sqlite_sqls/token/revoke.sql"))
            .bind(token)
            .execute(data_transaction!(data_interface_transaction))
            .await?
            .rows_affected();
        Ok(rows > 0)
    }

    async fn new_token_event(&self, token: String, action: TokenAction) -> anyhow::Result<()> {
        let mut data_interface_transaction = self.lock().await;
        let change_set_id = data_interface_transaction.change_set_id().await?;
        sqlx::query(include_str!("../../sqlite_sqls/token_event/new.sql"))
            .bind(token)
            .bind(change_set_id)
            .bind(action.as_str())
            .execute(data_transaction!(data_interface_transaction))
            .await?;
        Ok(())
    }

    async fn find_token_event_by_token(&self, token: String) -> anyhow::Result<Vec<TokenEvent>> {
        let mut data_interface_transaction = self.lock().await;

        let token_event_records = sqlx::query_as::<_, TokenEventRecord>(include_str!(
            "../../sqlite_sqls/token_event/find/by_token.sql"
        ))
        .bind(token)
        .fetch_all(data_transaction!(data_interface_transaction))
        .await?;

        token_event_records
            .into_iter()
            .map(|token_event_record| {
                Ok(TokenEvent {
                    token: token_event_record.token,
                    action: TokenAction::from_db(&token_event_record.action)?,
                    change_source: token_event_record.change_source,
                    change_date: token_event_record
                        .change_date
                        .and_then(|date| Utc.timestamp_opt(date, 0).single()),
                })
            })
            .collect()
    }
}
