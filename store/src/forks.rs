use anyhow::Result;

use crate::{rows::ForkRow, DbValue, EngineQuery, Store, StoreTransaction};

pub fn insert_fork(tx: &mut StoreTransaction, fork: &ForkRow) -> Result<()> {
    tx.execute(
        EngineQuery {
            pgsql: "INSERT INTO forks (
                fork_id, base_slot, base_root, leaf_slot, leaf_root, parent_fork
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (fork_id) DO UPDATE
            SET
                base_slot = excluded.base_slot,
                base_root = excluded.base_root,
                leaf_slot = excluded.leaf_slot,
                leaf_root = excluded.leaf_root,
                parent_fork = excluded.parent_fork",
            sqlite: "INSERT OR REPLACE INTO forks (
                fork_id, base_slot, base_root, leaf_slot, leaf_root, parent_fork
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        },
        &[
            fork.fork_id.into(),
            fork.base_slot.into(),
            fork.base_root.clone().into(),
            fork.leaf_slot.into(),
            fork.leaf_root.clone().into(),
            fork.parent_fork.into(),
        ],
    )?;

    Ok(())
}

pub async fn get_unfinalized_forks(store: &Store, finalized_slot: u64) -> Result<Vec<ForkRow>> {
    store
        .select(
            EngineQuery {
                pgsql: "SELECT fork_id, base_slot, base_root, leaf_slot, leaf_root, parent_fork
                    FROM forks
                    WHERE base_slot >= $1
                    ORDER BY base_slot ASC",
                sqlite: "SELECT fork_id, base_slot, base_root, leaf_slot, leaf_root, parent_fork
                    FROM forks
                    WHERE base_slot >= ?1
                    ORDER BY base_slot ASC",
            },
            vec![finalized_slot.into()],
            |row| {
                Ok(ForkRow {
                    fork_id: row.get_u64(0)?,
                    base_slot: row.get_u64(1)?,
                    base_root: row.get_bytes(2)?,
                    leaf_slot: row.get_u64(3)?,
                    leaf_root: row.get_bytes(4)?,
                    parent_fork: row.get_u64(5)?,
                })
            },
        )
        .await
}

pub async fn get_highest_fork_id(store: &Store) -> Result<Option<u64>> {
    store
        .select_optional(
            EngineQuery {
                pgsql: "SELECT MAX(fork_id) FROM forks",
                sqlite: "SELECT MAX(fork_id) FROM forks",
            },
            vec![],
            |row| row.get_opt_u64(0),
        )
        .await
        .map(Option::flatten)
}

pub fn delete_unfinalized_forks(tx: &mut StoreTransaction, finalized_slot: u64) -> Result<u64> {
    let params: &[DbValue] = &[finalized_slot.into()];

    tx.execute(
        EngineQuery {
            pgsql: "DELETE FROM forks WHERE base_slot < $1",
            sqlite: "DELETE FROM forks WHERE base_slot < ?1",
        },
        params,
    )
}
