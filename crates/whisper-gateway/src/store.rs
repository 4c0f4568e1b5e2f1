use std::sync::Arc;

use whisper_db::Database;

use crate::error::GatewayError;

/// Async handle to the durable store. Every call runs on the blocking pool so
/// a slow query never stalls other connections on the runtime.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn call<F, T>(&self, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || f(&db)).await?;
        Ok(result?)
    }
}
