use anyhow::Result;

use crate::{rows::SlashingRow, values_tuples, EngineQuery, Store, StoreTransaction};

pub fn insert_slashings(tx: &mut StoreTransaction, slashings: &[SlashingRow]) -> Result<()> {
    if slashings.is_empty() {
        return Ok(());
    }

    let engine = tx.engine();

    let mut sql = engine
        .select(EngineQuery {
            pgsql: "INSERT INTO slashings ",
            sqlite: "INSERT OR REPLACE INTO slashings ",
        })
        .to_owned();

    sql.push_str(
        "(slot_number, slot_index, slot_root, orphaned, validator, slasher, reason) VALUES ",
    );
    sql.push_str(&values_tuples(engine, slashings.len(), 7));
    sql.push_str(engine.select(EngineQuery {
        pgsql: " ON CONFLICT (slot_index, slot_root, validator)
            DO UPDATE SET orphaned = excluded.orphaned",
        sqlite: "",
    }));

    let mut params = Vec::with_capacity(slashings.len() * 7);

    for slashing in slashings {
        params.push(slashing.slot_number.into());
        params.push(slashing.slot_index.into());
        params.push(slashing.slot_root.clone().into());
        params.push(slashing.orphaned.into());
        params.push(slashing.validator.into());
        params.push(slashing.slasher.into());
        params.push((slashing.reason as u8).into());
    }

    tx.execute_sql(&sql, &params)?;

    Ok(())
}

pub async fn get_slashings(store: &Store) -> Result<Vec<SlashingRow>> {
    store
        .select(
            EngineQuery {
                pgsql: "SELECT slot_number, slot_index, slot_root, orphaned, validator,
                    slasher, reason
                    FROM slashings ORDER BY slot_number ASC, slot_index ASC, validator ASC",
                sqlite: "SELECT slot_number, slot_index, slot_root, orphaned, validator,
                    slasher, reason
                    FROM slashings ORDER BY slot_number ASC, slot_index ASC, validator ASC",
            },
            vec![],
            |row| {
                Ok(SlashingRow {
                    slot_number: row.get_u64(0)?,
                    slot_index: row.get_u64(1)?,
                    slot_root: row.get_bytes(2)?,
                    orphaned: row.get_bool(3)?,
                    validator: row.get_u64(4)?,
                    slasher: row.get_u64(5)?,
                    reason: row.get_u8(6)?.try_into()?,
                })
            },
        )
        .await
}
