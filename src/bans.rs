use chrono::NaiveDate;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::database::{BanRecord, DatabaseError, LocationStore};
use crate::utils::ValidationError;

#[derive(Error, Debug)]
pub enum BanError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Ban {0} does not exist")]
    NotFound(Uuid),
    #[error("Ban store failed: {0}")]
    Store(#[from] DatabaseError),
}

/// Splits ban records into `(live, expired)`. A ban expires at the start of
/// its expiry day.
pub fn check_expiry(records: Vec<BanRecord>, today: NaiveDate) -> (Vec<BanRecord>, Vec<BanRecord>) {
    records.into_iter().partition(|record| record.expires_on > today)
}

/// Ban list whose expired entries are purged whenever it is read.
pub struct BanList {
    store: Arc<dyn LocationStore>,
}

impl BanList {
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        Self { store }
    }

    pub async fn list_live(&self, today: NaiveDate) -> Result<Vec<BanRecord>, BanError> {
        let (live, expired) = check_expiry(self.store.list_bans().await?, today);

        if !expired.is_empty() {
            let ids: Vec<Uuid> = expired.iter().map(|record| record.id).collect();
            let deleted = self.store.delete_bans(&ids).await?;
            tracing::info!("Removed {} expired bans", deleted);
        }

        Ok(live)
    }

    pub async fn ban(
        &self,
        login: &str,
        expires_on: NaiveDate,
        today: NaiveDate,
    ) -> Result<BanRecord, BanError> {
        let login = login.trim();
        if login.is_empty() {
            return Err(ValidationError::new("Login must not be empty").into());
        }
        if expires_on <= today {
            return Err(ValidationError(format!(
                "Ban expiry {} must be after {}",
                expires_on, today
            ))
            .into());
        }

        let record = self.store.insert_ban(login, expires_on).await?;
        tracing::info!("Banned {} until {}", record.login, record.expires_on);
        Ok(record)
    }

    pub async fn lift(&self, id: Uuid) -> Result<(), BanError> {
        match self.store.delete_bans(&[id]).await? {
            0 => Err(BanError::NotFound(id)),
            _ => Ok(()),
        }
    }
}
