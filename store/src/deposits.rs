use anyhow::Result;

use crate::{
    rows::{DepositRow, DepositTxRow},
    values_tuples, EngineQuery, Store, StoreTransaction,
};

/// Inserts execution-layer deposit transactions in one multi-row statement.
///
/// Re-observing a deposit after a reorg only toggles its `orphaned` flag;
/// everything else about the log is immutable.
pub fn insert_deposit_txs(tx: &mut StoreTransaction, deposit_txs: &[DepositTxRow]) -> Result<()> {
    if deposit_txs.is_empty() {
        return Ok(());
    }

    let engine = tx.engine();

    let mut sql = engine
        .select(EngineQuery {
            pgsql: "INSERT INTO deposit_txs ",
            sqlite: "INSERT OR REPLACE INTO deposit_txs ",
        })
        .to_owned();

    sql.push_str(
        "(deposit_index, block_number, block_time, block_root, publickey, \
         withdrawal_credentials, amount, signature, valid_signature, orphaned, \
         tx_hash, tx_sender, tx_target) VALUES ",
    );
    sql.push_str(&values_tuples(engine, deposit_txs.len(), 13));
    sql.push_str(engine.select(EngineQuery {
        pgsql: " ON CONFLICT (deposit_index, block_root)
            DO UPDATE SET orphaned = excluded.orphaned",
        sqlite: "",
    }));

    let mut params = Vec::with_capacity(deposit_txs.len() * 13);

    for deposit_tx in deposit_txs {
        params.push(deposit_tx.deposit_index.into());
        params.push(deposit_tx.block_number.into());
        params.push(deposit_tx.block_time.into());
        params.push(deposit_tx.block_root.clone().into());
        params.push(deposit_tx.publickey.clone().into());
        params.push(deposit_tx.withdrawal_credentials.clone().into());
        params.push(deposit_tx.amount.into());
        params.push(deposit_tx.signature.clone().into());
        params.push(deposit_tx.valid_signature.into());
        params.push(deposit_tx.orphaned.into());
        params.push(deposit_tx.tx_hash.clone().into());
        params.push(deposit_tx.tx_sender.clone().into());
        params.push(deposit_tx.tx_target.clone().into());
    }

    tx.execute_sql(&sql, &params)?;

    Ok(())
}

pub fn insert_deposits(tx: &mut StoreTransaction, deposits: &[DepositRow]) -> Result<()> {
    if deposits.is_empty() {
        return Ok(());
    }

    let engine = tx.engine();

    let mut sql = engine
        .select(EngineQuery {
            pgsql: "INSERT INTO deposits ",
            sqlite: "INSERT OR REPLACE INTO deposits ",
        })
        .to_owned();

    sql.push_str(
        "(deposit_index, slot_number, slot_index, slot_root, orphaned, publickey, \
         withdrawal_credentials, amount) VALUES ",
    );
    sql.push_str(&values_tuples(engine, deposits.len(), 8));
    sql.push_str(engine.select(EngineQuery {
        pgsql: " ON CONFLICT (slot_index, slot_root)
            DO UPDATE SET deposit_index = excluded.deposit_index,
                orphaned = excluded.orphaned",
        sqlite: "",
    }));

    let mut params = Vec::with_capacity(deposits.len() * 8);

    for deposit in deposits {
        params.push(deposit.deposit_index.into());
        params.push(deposit.slot_number.into());
        params.push(deposit.slot_index.into());
        params.push(deposit.slot_root.clone().into());
        params.push(deposit.orphaned.into());
        params.push(deposit.publickey.clone().into());
        params.push(deposit.withdrawal_credentials.clone().into());
        params.push(deposit.amount.into());
    }

    tx.execute_sql(&sql, &params)?;

    Ok(())
}

pub async fn get_max_deposit_index(store: &Store) -> Result<Option<u64>> {
    store
        .select_optional(
            EngineQuery {
                pgsql: "SELECT MAX(deposit_index) FROM deposits",
                sqlite: "SELECT MAX(deposit_index) FROM deposits",
            },
            vec![],
            |row| row.get_opt_u64(0),
        )
        .await
        .map(Option::flatten)
}

pub async fn get_deposit_tx_count(store: &Store) -> Result<u64> {
    store
        .select_optional(
            EngineQuery {
                pgsql: "SELECT COUNT(*) FROM deposit_txs",
                sqlite: "SELECT COUNT(*) FROM deposit_txs",
            },
            vec![],
            |row| row.get_u64(0),
        )
        .await
        .map(Option::unwrap_or_default)
}

pub async fn get_deposit_txs(store: &Store) -> Result<Vec<DepositTxRow>> {
    store
        .select(
            EngineQuery {
                pgsql: "SELECT deposit_index, block_number, block_time, block_root, publickey,
                    withdrawal_credentials, amount, signature, valid_signature, orphaned,
                    tx_hash, tx_sender, tx_target
                    FROM deposit_txs ORDER BY deposit_index ASC",
                sqlite: "SELECT deposit_index, block_number, block_time, block_root, publickey,
                    withdrawal_credentials, amount, signature, valid_signature, orphaned,
                    tx_hash, tx_sender, tx_target
                    FROM deposit_txs ORDER BY deposit_index ASC",
            },
            vec![],
            |row| {
                Ok(DepositTxRow {
                    deposit_index: row.get_u64(0)?,
                    block_number: row.get_u64(1)?,
                    block_time: row.get_u64(2)?,
                    block_root: row.get_bytes(3)?,
                    publickey: row.get_bytes(4)?,
                    withdrawal_credentials: row.get_bytes(5)?,
                    amount: row.get_u64(6)?,
                    signature: row.get_bytes(7)?,
                    valid_signature: row.get_u8(8)?,
                    orphaned: row.get_bool(9)?,
                    tx_hash: row.get_bytes(10)?,
                    tx_sender: row.get_bytes(11)?,
                    tx_target: row.get_bytes(12)?,
                })
            },
        )
        .await
}
