//! Single-row persistent state for named indexers.
//!
//! The value is an opaque serialized blob owned by the indexer that wrote it.

use anyhow::Result;

use crate::{EngineQuery, Store, StoreTransaction};

pub async fn get_explorer_state(store: &Store, key: &str) -> Result<Option<String>> {
    store
        .select_optional(
            EngineQuery {
                pgsql: "SELECT value FROM explorer_state WHERE key = $1",
                sqlite: "SELECT value FROM explorer_state WHERE key = ?1",
            },
            vec![key.into()],
            |row| row.get_text(0),
        )
        .await
}

pub fn set_explorer_state(tx: &mut StoreTransaction, key: &str, value: &str) -> Result<()> {
    tx.execute(
        EngineQuery {
            pgsql: "INSERT INTO explorer_state (key, value) VALUES ($1, $2)
                ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            sqlite: "INSERT OR REPLACE INTO explorer_state (key, value) VALUES (?1, ?2)",
        },
        &[key.into(), value.into()],
    )?;

    Ok(())
}
