use anyhow::Result;

use crate::{rows::EpochRow, EngineQuery, StoreTransaction};

pub fn upsert_epoch(tx: &mut StoreTransaction, epoch: &EpochRow) -> Result<()> {
    tx.execute(
        EngineQuery {
            pgsql: "INSERT INTO epochs (epoch, block_count, payload_count)
                VALUES ($1, $2, $3)
                ON CONFLICT (epoch) DO UPDATE
                SET block_count = excluded.block_count,
                    payload_count = excluded.payload_count",
            sqlite: "INSERT OR REPLACE INTO epochs (epoch, block_count, payload_count)
                VALUES (?1, ?2, ?3)",
        },
        &[
            epoch.epoch.into(),
            epoch.block_count.into(),
            epoch.payload_count.into(),
        ],
    )?;

    Ok(())
}

pub fn upsert_unfinalized_epoch(
    tx: &mut StoreTransaction,
    epoch: u64,
    payload_count: u64,
) -> Result<()> {
    tx.execute(
        EngineQuery {
            pgsql: "INSERT INTO unfinalized_epochs (epoch, payload_count)
                VALUES ($1, $2)
                ON CONFLICT (epoch) DO UPDATE
                SET payload_count = excluded.payload_count",
            sqlite: "INSERT OR REPLACE INTO unfinalized_epochs (epoch, payload_count)
                VALUES (?1, ?2)",
        },
        &[epoch.into(), payload_count.into()],
    )?;

    Ok(())
}

pub fn delete_unfinalized_epochs_before(tx: &mut StoreTransaction, epoch: u64) -> Result<u64> {
    tx.execute(
        EngineQuery {
            pgsql: "DELETE FROM unfinalized_epochs WHERE epoch < $1",
            sqlite: "DELETE FROM unfinalized_epochs WHERE epoch < ?1",
        },
        &[epoch.into()],
    )
}
