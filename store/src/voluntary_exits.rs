use anyhow::Result;

use crate::{rows::VoluntaryExitRow, values_tuples, EngineQuery, Store, StoreTransaction};

pub fn insert_voluntary_exits(
    tx: &mut StoreTransaction,
    voluntary_exits: &[VoluntaryExitRow],
) -> Result<()> {
    if voluntary_exits.is_empty() {
        return Ok(());
    }

    let engine = tx.engine();

    let mut sql = engine
        .select(EngineQuery {
            pgsql: "INSERT INTO voluntary_exits ",
            sqlite: "INSERT OR REPLACE INTO voluntary_exits ",
        })
        .to_owned();

    sql.push_str("(slot_number, slot_index, slot_root, orphaned, validator) VALUES ");
    sql.push_str(&values_tuples(engine, voluntary_exits.len(), 5));
    sql.push_str(engine.select(EngineQuery {
        pgsql: " ON CONFLICT (slot_index, slot_root)
            DO UPDATE SET orphaned = excluded.orphaned",
        sqlite: "",
    }));

    let mut params = Vec::with_capacity(voluntary_exits.len() * 5);

    for voluntary_exit in voluntary_exits {
        params.push(voluntary_exit.slot_number.into());
        params.push(voluntary_exit.slot_index.into());
        params.push(voluntary_exit.slot_root.clone().into());
        params.push(voluntary_exit.orphaned.into());
        params.push(voluntary_exit.validator.into());
    }

    tx.execute_sql(&sql, &params)?;

    Ok(())
}

pub async fn get_voluntary_exits(store: &Store) -> Result<Vec<VoluntaryExitRow>> {
    store
        .select(
            EngineQuery {
                pgsql: "SELECT slot_number, slot_index, slot_root, orphaned, validator
                    FROM voluntary_exits ORDER BY slot_number ASC, slot_index ASC",
                sqlite: "SELECT slot_number, slot_index, slot_root, orphaned, validator
                    FROM voluntary_exits ORDER BY slot_number ASC, slot_index ASC",
            },
            vec![],
            |row| {
                Ok(VoluntaryExitRow {
                    slot_number: row.get_u64(0)?,
                    slot_index: row.get_u64(1)?,
                    slot_root: row.get_bytes(2)?,
                    orphaned: row.get_bool(3)?,
                    validator: row.get_u64(4)?,
                })
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use crate::schema;

    use super::*;

    fn exit_row(slot_number: u64, validator: u64, orphaned: bool) -> VoluntaryExitRow {
        VoluntaryExitRow {
            slot_number,
            slot_index: 0,
            slot_root: vec![slot_number as u8; 32],
            orphaned,
            validator,
        }
    }

    #[tokio::test]
    async fn batch_round_trips_and_conflict_updates_orphaned() -> Result<()> {
        let store = Store::in_memory()?;
        schema::apply_schema(&store).await?;

        let batch = vec![exit_row(100, 11, false), exit_row(101, 12, false)];

        store
            .run_transaction(move |tx| insert_voluntary_exits(tx, &batch))
            .await?;

        assert_eq!(
            get_voluntary_exits(&store).await?,
            vec![exit_row(100, 11, false), exit_row(101, 12, false)],
        );

        // Re-observing the exit after a reorg only flips the orphaned flag.
        let replay = vec![exit_row(101, 12, true)];

        store
            .run_transaction(move |tx| insert_voluntary_exits(tx, &replay))
            .await?;

        let rows = get_voluntary_exits(&store).await?;
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].orphaned);
        assert!(rows[1].orphaned);

        Ok(())
    }
}
