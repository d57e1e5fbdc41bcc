use std::sync::Arc;

use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use tracing::{info, warn};

use crate::{
    data_interface::{DataInterface, DataInterfaceAccessTransaction, DataInterfaceType},
    data_interfaces::data_interface_sqlite::DataInterfaceSQLite,
    keygate_error::KeygateError,
    keygate_file::KeygateFile,
    model::{GeneratedToken, Token, TokenAction, TokenEvent, TokenStatus},
    plan::Plan,
};

const TOKEN_BYTES: usize = 12;

/// Source of "now" as fractional Unix seconds.
pub type Clock = Arc<dyn Fn() -> f64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp_millis() as f64 / 1000.0)
}

/// First eight characters of a token, for log lines.
pub fn token_hint(token: &str) -> &str {
    token
        .char_indices()
        .nth(8)
        .map_or(token, |(index, _)| &token[..index])
}

pub struct Keygate {
    pub data_interface: Box<dyn DataInterface>,
    pub keygate_file: KeygateFile,
    change_source: String,
    clock: Clock,
}

impl Keygate {
    pub async fn new(keygate_file: KeygateFile, change_source: &str) -> anyhow::Result<Keygate> {
        let mut data_interface: Box<dyn DataInterface> = match &keygate_file.data_interface {
            DataInterfaceType::Sqlite => {
                if !keygate_file.url.starts_with("sqlite:") {
                    anyhow::bail!(KeygateError::UnsupportedUrl {
                        data_interface: "Sqlite".to_owned(),
                        url: keygate_file.url.clone(),
                    });
                }
                keygate_file.ensure_database_dir()?;
                Box::new(DataInterfaceSQLite::new(keygate_file.url.clone()))
            }
        };

        data_interface.init().await?;

        Ok(Keygate {
            data_interface,
            keygate_file,
            change_source: change_source.to_owned(),
            clock: system_clock(),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> f64 {
        (self.clock)()
    }

    async fn transaction(&self) -> anyhow::Result<Box<dyn DataInterfaceAccessTransaction>> {
        self.data_interface
            .create_transaction(self.change_source.clone())
            .await
    }

    fn new_token_value(&self) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|byte| format!("{byte:02X}")).collect();
        format!("{}-{}", self.keygate_file.token_prefix, hex)
    }

    pub async fn generate(&self, plan: &str) -> anyhow::Result<GeneratedToken> {
        let plan = Plan::parse(plan)?;
        let transaction = self.transaction().await?;

        let created_token = transaction
            .new_token(Token {
                token: self.new_token_value(),
                hwid: None,
                expires_at: plan.expires_at(self.now()),
                revoked: false,
            })
            .await?;
        transaction
            .new_token_event(created_token.token.clone(), TokenAction::Generated)
            .await?;
        transaction.commit().await?;

        info!(token = token_hint(&created_token.token), %plan, "token generated");
        Ok(GeneratedToken {
            token: created_token.token,
            plan: plan.to_string(),
            expires_at: created_token.expires_at,
        })
    }

    /// Checks a client token and binds it to `hwid` on first use.
    pub async fn verify(&self, token: String, hwid: String) -> anyhow::Result<()> {
        let transaction = self.transaction().await?;

        let found_token = match transaction.find_token_by_token(token.clone()).await? {
            Some(found_token) => found_token,
            None => anyhow::bail!(KeygateError::InvalidToken),
        };
        if found_token.revoked {
            anyhow::bail!(KeygateError::TokenRevoked);
        }
        if found_token.is_expired(self.now()) {
            anyhow::bail!(KeygateError::TokenExpired);
        }

        match found_token.hwid {
            None => {
                if transaction
                    .bind_token_hwid(token.clone(), hwid.clone())
                    .await?
                {
                    transaction
                        .new_token_event(token.clone(), TokenAction::Bound)
                        .await?;
                    transaction.commit().await?;
                    info!(token = token_hint(&token), "token bound to hwid");
                } else {
                    // Someone else bound it between our read and our update.
                    let bound_hwid = transaction
                        .find_token_by_token(token.clone())
                        .await?
                        .and_then(|current| current.hwid);
                    if bound_hwid.as_deref() != Some(hwid.as_str()) {
                        warn!(token = token_hint(&token), "hwid mismatch after concurrent bind");
                        anyhow::bail!(KeygateError::HwidMismatch);
                    }
                }
            }
            Some(bound_hwid) if bound_hwid == hwid => {}
            Some(_) => {
                warn!(token = token_hint(&token), "hwid mismatch");
                anyhow::bail!(KeygateError::HwidMismatch);
            }
        }
        Ok(())
    }

    pub async fn inspect(&self, token: String) -> anyhow::Result<TokenStatus> {
        let transaction = self.transaction().await?;
        let found_token = match transaction.find_token_by_token(token).await? {
            Some(found_token) => found_token,
            None => anyhow::bail!(KeygateError::TokenNotFound),
        };

        let seconds_remaining = found_token.seconds_remaining(self.now());
        Ok(TokenStatus {
            token: found_token.token,
            hwid: found_token.hwid,
            revoked: found_token.revoked,
            expires_at: found_token.expires_at,
            seconds_remaining,
        })
    }

    /// Clears the HWID binding. Unknown tokens are left alone without error.
    pub async fn unbind(&self, token: String) -> anyhow::Result<()> {
        let transaction = self.transaction().await?;
        if transaction.clear_token_hwid(token.clone()).await? {
            transaction
                .new_token_event(token.clone(), TokenAction::Unbound)
                .await?;
            info!(token = token_hint(&token), "token unbound");
        }
        transaction.commit().await?;
        Ok(())
    }

    /// Marks the token revoked. Unknown tokens are left alone without error.
    pub async fn revoke(&self, token: String) -> anyhow::Result<()> {
        let transaction = self.transaction().await?;
        if transaction.revoke_token(token.clone()).await? {
            transaction
                .new_token_event(token.clone(), TokenAction::Revoked)
                .await?;
            info!(token = token_hint(&token), "token revoked");
        }
        transaction.commit().await?;
        Ok(())
    }

    pub async fn history(&self, token: String) -> anyhow::Result<Vec<TokenEvent>> {
        let transaction = self.transaction().await?;
        if transaction
            .find_token_by_token(token.clone())
            .await?
            .is_none()
        {
            anyhow::bail!(KeygateError::TokenNotFound);
        }
        transaction.find_token_event_by_token(token).await
    }
}
