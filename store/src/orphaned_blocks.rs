use anyhow::Result;

use crate::{rows::OrphanedBlockRow, EngineQuery, Store, StoreTransaction};

pub fn insert_orphaned_block(tx: &mut StoreTransaction, block: &OrphanedBlockRow) -> Result<()> {
    tx.execute(
        EngineQuery {
            pgsql: "INSERT INTO orphaned_blocks (
                root, header_ver, header_ssz, block_ver, block_ssz, payload_ver, payload_ssz
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (root) DO NOTHING",
            sqlite: "INSERT OR IGNORE INTO orphaned_blocks (
                root, header_ver, header_ssz, block_ver, block_ssz, payload_ver, payload_ssz
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        },
        &[
            block.root.clone().into(),
            block.header_ver.into(),
            block.header_ssz.clone().into(),
            block.block_ver.into(),
            block.block_ssz.clone().into(),
            block.payload_ver.into(),
            block.payload_ssz.clone().into(),
        ],
    )?;

    Ok(())
}

pub async fn get_orphaned_block(store: &Store, root: &[u8]) -> Result<Option<OrphanedBlockRow>> {
    store
        .select_optional(
            EngineQuery {
                pgsql: "SELECT root, header_ver, header_ssz, block_ver, block_ssz,
                    payload_ver, payload_ssz
                    FROM orphaned_blocks WHERE root = $1",
                sqlite: "SELECT root, header_ver, header_ssz, block_ver, block_ssz,
                    payload_ver, payload_ssz
                    FROM orphaned_blocks WHERE root = ?1",
            },
            vec![root.into()],
            |row| {
                Ok(OrphanedBlockRow {
                    root: row.get_bytes(0)?,
                    header_ver: row.get_u8(1)?,
                    header_ssz: row.get_bytes(2)?,
                    block_ver: row.get_u8(3)?,
                    block_ssz: row.get_bytes(4)?,
                    payload_ver: row.get_opt_u8(5)?,
                    payload_ssz: row.get_opt_bytes(6)?,
                })
            },
        )
        .await
}
