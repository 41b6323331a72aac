use anyhow::Result;

use crate::{rows::ConsolidationRow, values_tuples, EngineQuery, Store, StoreTransaction};

pub fn insert_consolidations(
    tx: &mut StoreTransaction,
    consolidations: &[ConsolidationRow],
) -> Result<()> {
    if consolidations.is_empty() {
        return Ok(());
    }

    let engine = tx.engine();

    let mut sql = engine
        .select(EngineQuery {
            pgsql: "INSERT INTO consolidations ",
            sqlite: "INSERT OR REPLACE INTO consolidations ",
        })
        .to_owned();

    sql.push_str(
        "(slot_number, slot_index, slot_root, orphaned, source_index, target_index, epoch) \
         VALUES ",
    );
    sql.push_str(&values_tuples(engine, consolidations.len(), 7));
    sql.push_str(engine.select(EngineQuery {
        pgsql: " ON CONFLICT (slot_index, slot_root)
            DO UPDATE SET orphaned = excluded.orphaned",
        sqlite: "",
    }));

    let mut params = Vec::with_capacity(consolidations.len() * 7);

    for consolidation in consolidations {
        params.push(consolidation.slot_number.into());
        params.push(consolidation.slot_index.into());
        params.push(consolidation.slot_root.clone().into());
        params.push(consolidation.orphaned.into());
        params.push(consolidation.source_index.into());
        params.push(consolidation.target_index.into());
        params.push(consolidation.epoch.into());
    }

    tx.execute_sql(&sql, &params)?;

    Ok(())
}

pub async fn get_consolidations(store: &Store) -> Result<Vec<ConsolidationRow>> {
    store
        .select(
            EngineQuery {
                pgsql: "SELECT slot_number, slot_index, slot_root, orphaned, source_index,
                    target_index, epoch
                    FROM consolidations ORDER BY slot_number ASC, slot_index ASC",
                sqlite: "SELECT slot_number, slot_index, slot_root, orphaned, source_index,
                    target_index, epoch
                    FROM consolidations ORDER BY slot_number ASC, slot_index ASC",
            },
            vec![],
            |row| {
                Ok(ConsolidationRow {
                    slot_number: row.get_u64(0)?,
                    slot_index: row.get_u64(1)?,
                    slot_root: row.get_bytes(2)?,
                    orphaned: row.get_bool(3)?,
                    source_index: row.get_u64(4)?,
                    target_index: row.get_u64(5)?,
                    epoch: row.get_u64(6)?,
                })
            },
        )
        .await
}

#[cfg(test)]
mod tests {
    use crate::schema;

    use super::*;

    fn consolidation_row(slot_number: u64, source_index: u64, orphaned: bool) -> ConsolidationRow {
        ConsolidationRow {
            slot_number,
            slot_index: 0,
            slot_root: vec![slot_number as u8; 32],
            orphaned,
            source_index,
            target_index: source_index + 1,
            epoch: 12,
        }
    }

    #[tokio::test]
    async fn batch_round_trips_and_conflict_updates_orphaned() -> Result<()> {
        let store = Store::in_memory()?;
        schema::apply_schema(&store).await?;

        let batch = vec![
            consolidation_row(100, 2000, false),
            consolidation_row(101, 2001, false),
        ];

        store
            .run_transaction(move |tx| insert_consolidations(tx, &batch))
            .await?;

        assert_eq!(
            get_consolidations(&store).await?,
            vec![
                consolidation_row(100, 2000, false),
                consolidation_row(101, 2001, false),
            ],
        );

        let replay = vec![consolidation_row(101, 2001, true)];

        store
            .run_transaction(move |tx| insert_consolidations(tx, &replay))
            .await?;

        let rows = get_consolidations(&store).await?;
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].orphaned);
        assert!(rows[1].orphaned);

        Ok(())
    }
}
