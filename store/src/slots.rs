use anyhow::Result;

use crate::{rows::SlotRow, EngineQuery, Store, StoreTransaction};

pub fn insert_slot(tx: &mut StoreTransaction, slot: &SlotRow) -> Result<()> {
    tx.execute(
        EngineQuery {
            pgsql: "INSERT INTO slots (
                slot_number, slot_root, status, proposer, parent_root, state_root,
                graffiti, eth_block_number, eth_block_hash, eth_block_extra,
                fork_id, has_payload
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (slot_number, slot_root) DO UPDATE
            SET status = excluded.status, has_payload = excluded.has_payload",
            sqlite: "INSERT OR REPLACE INTO slots (
                slot_number, slot_root, status, proposer, parent_root, state_root,
                graffiti, eth_block_number, eth_block_hash, eth_block_extra,
                fork_id, has_payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        },
        &[
            slot.slot.into(),
            slot.root.clone().into(),
            (slot.status as u8).into(),
            slot.proposer.into(),
            slot.parent_root.clone().into(),
            slot.state_root.clone().into(),
            slot.graffiti.clone().into(),
            slot.eth_block_number.into(),
            slot.eth_block_hash.clone().into(),
            slot.eth_block_extra.clone().into(),
            slot.fork_id.into(),
            slot.has_payload.into(),
        ],
    )?;

    Ok(())
}

pub async fn count_slots_with_payload(store: &Store) -> Result<u64> {
    store
        .select_optional(
            EngineQuery {
                pgsql: "SELECT COUNT(*) FROM slots WHERE has_payload = TRUE",
                sqlite: "SELECT COUNT(*) FROM slots WHERE has_payload = 1",
            },
            vec![],
            |row| row.get_u64(0),
        )
        .await
        .map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use crate::{rows::SlotStatus, schema};

    use super::*;

    #[tokio::test]
    async fn canonical_slot_round_trips() -> Result<()> {
        let store = Store::in_memory()?;
        schema::apply_schema(&store).await?;

        let row = SlotRow {
            slot: 100,
            root: vec![1; 32],
            status: SlotStatus::Canonical,
            proposer: Some(5),
            parent_root: Some(vec![2; 32]),
            state_root: Some(vec![3; 32]),
            graffiti: Some(vec![4; 32]),
            eth_block_number: Some(17_000_000),
            eth_block_hash: Some(vec![5; 32]),
            eth_block_extra: Some(b"extra".to_vec()),
            fork_id: 0,
            has_payload: true,
        };

        store.run_transaction(move |tx| insert_slot(tx, &row)).await?;

        assert_eq!(count_slots_with_payload(&store).await?, 1);

        Ok(())
    }
}
