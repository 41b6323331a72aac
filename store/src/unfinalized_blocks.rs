use anyhow::Result;

use crate::{
    rows::{UnfinalizedBlockRow, UnfinalizedBlockStatus},
    EngineQuery, Store, StoreTransaction,
};

pub fn insert_unfinalized_block(tx: &mut StoreTransaction, block: &UnfinalizedBlockRow) -> Result<()> {
    tx.execute(
        EngineQuery {
            pgsql: "INSERT INTO unfinalized_blocks (
                root, slot, header_ver, header_ssz, block_ver, block_ssz,
                status, fork_id, payload_ver, payload_ssz
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (root) DO NOTHING",
            sqlite: "INSERT OR IGNORE INTO unfinalized_blocks (
                root, slot, header_ver, header_ssz, block_ver, block_ssz,
                status, fork_id, payload_ver, payload_ssz
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        },
        &[
            block.root.clone().into(),
            block.slot.into(),
            block.header_ver.into(),
            block.header_ssz.clone().into(),
            block.block_ver.into(),
            block.block_ssz.clone().into(),
            (block.status as u8).into(),
            block.fork_id.into(),
            block.payload_ver.into(),
            block.payload_ssz.clone().into(),
        ],
    )?;

    Ok(())
}

pub fn update_unfinalized_block_status(
    tx: &mut StoreTransaction,
    root: &[u8],
    status: UnfinalizedBlockStatus,
) -> Result<()> {
    tx.execute(
        EngineQuery {
            pgsql: "UPDATE unfinalized_blocks SET status = $1 WHERE root = $2",
            sqlite: "UPDATE unfinalized_blocks SET status = ?1 WHERE root = ?2",
        },
        &[(status as u8).into(), root.into()],
    )?;

    Ok(())
}

/// Relabels the given blocks to a new fork, one `UPDATE` per root.
pub fn update_unfinalized_block_fork_ids(
    tx: &mut StoreTransaction,
    roots: &[Vec<u8>],
    fork_id: u64,
) -> Result<()> {
    for root in roots {
        tx.execute(
            EngineQuery {
                pgsql: "UPDATE unfinalized_blocks SET fork_id = $1 WHERE root = $2",
                sqlite: "UPDATE unfinalized_blocks SET fork_id = ?1 WHERE root = ?2",
            },
            &[fork_id.into(), root.clone().into()],
        )?;
    }

    Ok(())
}

pub async fn get_unfinalized_blocks(store: &Store) -> Result<Vec<UnfinalizedBlockRow>> {
    store
        .select(
            EngineQuery {
                pgsql: "SELECT root, slot, header_ver, header_ssz, block_ver, block_ssz,
                    status, fork_id, payload_ver, payload_ssz
                    FROM unfinalized_blocks ORDER BY slot ASC",
                sqlite: "SELECT root, slot, header_ver, header_ssz, block_ver, block_ssz,
                    status, fork_id, payload_ver, payload_ssz
                    FROM unfinalized_blocks ORDER BY slot ASC",
            },
            vec![],
            |row| UnfinalizedBlockRow::from_row(&row),
        )
        .await
}

pub async fn get_unfinalized_block(
    store: &Store,
    root: &[u8],
) -> Result<Option<UnfinalizedBlockRow>> {
    store
        .select_optional(
            EngineQuery {
                pgsql: "SELECT root, slot, header_ver, header_ssz, block_ver, block_ssz,
                    status, fork_id, payload_ver, payload_ssz
                    FROM unfinalized_blocks WHERE root = $1",
                sqlite: "SELECT root, slot, header_ver, header_ssz, block_ver, block_ssz,
                    status, fork_id, payload_ver, payload_ssz
                    FROM unfinalized_blocks WHERE root = ?1",
            },
            vec![root.into()],
            |row| UnfinalizedBlockRow::from_row(&row),
        )
        .await
}

pub fn delete_unfinalized_blocks_before(tx: &mut StoreTransaction, slot: u64) -> Result<u64> {
    tx.execute(
        EngineQuery {
            pgsql: "DELETE FROM unfinalized_blocks WHERE slot < $1",
            sqlite: "DELETE FROM unfinalized_blocks WHERE slot < ?1",
        },
        &[slot.into()],
    )
}

#[cfg(test)]
mod tests {
    use crate::schema;

    use super::*;

    fn block_row(root_byte: u8, slot: u64) -> UnfinalizedBlockRow {
        UnfinalizedBlockRow {
            root: vec![root_byte; 32],
            slot,
            header_ver: 1,
            header_ssz: vec![root_byte; 208],
            block_ver: 1,
            block_ssz: vec![root_byte; 64],
            status: UnfinalizedBlockStatus::Pending,
            fork_id: 0,
            payload_ver: None,
            payload_ssz: None,
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_per_root() -> Result<()> {
        let store = Store::in_memory()?;
        schema::apply_schema(&store).await?;

        let block = block_row(1, 100);
        let duplicate = UnfinalizedBlockRow {
            slot: 999,
            ..block_row(1, 100)
        };

        store
            .run_transaction(move |tx| {
                insert_unfinalized_block(tx, &block)?;
                insert_unfinalized_block(tx, &duplicate)?;
                Ok(())
            })
            .await?;

        let loaded = get_unfinalized_block(&store, &[1; 32]).await?.expect("row");
        assert_eq!(loaded.slot, 100);

        Ok(())
    }

    #[tokio::test]
    async fn fork_relabel_updates_every_root() -> Result<()> {
        let store = Store::in_memory()?;
        schema::apply_schema(&store).await?;

        let roots: Vec<Vec<u8>> = (1..=3).map(|byte| vec![byte; 32]).collect();
        let blocks: Vec<_> = (1..=3).map(|byte| block_row(byte, 100 + byte as u64)).collect();
        let relabel = roots.clone();

        store
            .run_transaction(move |tx| {
                for block in &blocks {
                    insert_unfinalized_block(tx, block)?;
                }

                update_unfinalized_block_fork_ids(tx, &relabel, 7)
            })
            .await?;

        for root in roots {
            let row = get_unfinalized_block(&store, &root).await?.expect("row");
            assert_eq!(row.fork_id, 7);
        }

        Ok(())
    }

    #[tokio::test]
    async fn prune_below_slot() -> Result<()> {
        let store = Store::in_memory()?;
        schema::apply_schema(&store).await?;

        store
            .run_transaction(|tx| {
                insert_unfinalized_block(tx, &block_row(1, 100))?;
                insert_unfinalized_block(tx, &block_row(2, 105))?;
                Ok(())
            })
            .await?;

        let deleted = store
            .run_transaction(|tx| delete_unfinalized_blocks_before(tx, 105))
            .await?;

        assert_eq!(deleted, 1);
        assert_eq!(get_unfinalized_blocks(&store).await?.len(), 1);

        Ok(())
    }
}
