//! Table definitions for both engines.
//!
//! Applied unconditionally at startup; every statement is idempotent.

use anyhow::Result;

use crate::{EngineQuery, Store};

const STATEMENTS: &[EngineQuery] = &[
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS unfinalized_blocks (
            root BYTEA NOT NULL PRIMARY KEY,
            slot BIGINT NOT NULL,
            header_ver BIGINT NOT NULL,
            header_ssz BYTEA NOT NULL,
            block_ver BIGINT NOT NULL,
            block_ssz BYTEA NOT NULL,
            status BIGINT NOT NULL,
            fork_id BIGINT NOT NULL DEFAULT 0,
            payload_ver BIGINT,
            payload_ssz BYTEA
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS unfinalized_blocks (
            root BLOB NOT NULL PRIMARY KEY,
            slot INTEGER NOT NULL,
            header_ver INTEGER NOT NULL,
            header_ssz BLOB NOT NULL,
            block_ver INTEGER NOT NULL,
            block_ssz BLOB NOT NULL,
            status INTEGER NOT NULL,
            fork_id INTEGER NOT NULL DEFAULT 0,
            payload_ver INTEGER,
            payload_ssz BLOB
        )",
    },
    EngineQuery {
        pgsql: "CREATE INDEX IF NOT EXISTS unfinalized_blocks_slot_idx
            ON unfinalized_blocks (slot)",
        sqlite: "CREATE INDEX IF NOT EXISTS unfinalized_blocks_slot_idx
            ON unfinalized_blocks (slot)",
    },
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS orphaned_blocks (
            root BYTEA NOT NULL PRIMARY KEY,
            header_ver BIGINT NOT NULL,
            header_ssz BYTEA NOT NULL,
            block_ver BIGINT NOT NULL,
            block_ssz BYTEA NOT NULL,
            payload_ver BIGINT,
            payload_ssz BYTEA
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS orphaned_blocks (
            root BLOB NOT NULL PRIMARY KEY,
            header_ver INTEGER NOT NULL,
            header_ssz BLOB NOT NULL,
            block_ver INTEGER NOT NULL,
            block_ssz BLOB NOT NULL,
            payload_ver INTEGER,
            payload_ssz BLOB
        )",
    },
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS slots (
            slot_number BIGINT NOT NULL,
            slot_root BYTEA NOT NULL,
            status BIGINT NOT NULL,
            proposer BIGINT,
            parent_root BYTEA,
            state_root BYTEA,
            graffiti BYTEA,
            eth_block_number BIGINT,
            eth_block_hash BYTEA,
            eth_block_extra BYTEA,
            fork_id BIGINT NOT NULL DEFAULT 0,
            has_payload BOOLEAN NOT NULL DEFAULT FALSE,
            PRIMARY KEY (slot_number, slot_root)
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS slots (
            slot_number INTEGER NOT NULL,
            slot_root BLOB NOT NULL,
            status INTEGER NOT NULL,
            proposer INTEGER,
            parent_root BLOB,
            state_root BLOB,
            graffiti BLOB,
            eth_block_number INTEGER,
            eth_block_hash BLOB,
            eth_block_extra BLOB,
            fork_id INTEGER NOT NULL DEFAULT 0,
            has_payload INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (slot_number, slot_root)
        )",
    },
    EngineQuery {
        pgsql: "CREATE INDEX IF NOT EXISTS slots_has_payload_idx ON slots (has_payload)",
        sqlite: "CREATE INDEX IF NOT EXISTS slots_has_payload_idx ON slots (has_payload)",
    },
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS epochs (
            epoch BIGINT NOT NULL PRIMARY KEY,
            block_count BIGINT NOT NULL DEFAULT 0,
            payload_count BIGINT NOT NULL DEFAULT 0
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS epochs (
            epoch INTEGER NOT NULL PRIMARY KEY,
            block_count INTEGER NOT NULL DEFAULT 0,
            payload_count INTEGER NOT NULL DEFAULT 0
        )",
    },
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS unfinalized_epochs (
            epoch BIGINT NOT NULL PRIMARY KEY,
            payload_count BIGINT NOT NULL DEFAULT 0
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS unfinalized_epochs (
            epoch INTEGER NOT NULL PRIMARY KEY,
            payload_count INTEGER NOT NULL DEFAULT 0
        )",
    },
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS forks (
            fork_id BIGINT NOT NULL PRIMARY KEY,
            base_slot BIGINT NOT NULL,
            base_root BYTEA NOT NULL,
            leaf_slot BIGINT NOT NULL,
            leaf_root BYTEA NOT NULL,
            parent_fork BIGINT NOT NULL
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS forks (
            fork_id INTEGER NOT NULL PRIMARY KEY,
            base_slot INTEGER NOT NULL,
            base_root BLOB NOT NULL,
            leaf_slot INTEGER NOT NULL,
            leaf_root BLOB NOT NULL,
            parent_fork INTEGER NOT NULL
        )",
    },
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS deposit_txs (
            deposit_index BIGINT NOT NULL,
            block_number BIGINT NOT NULL,
            block_time BIGINT NOT NULL DEFAULT 0,
            block_root BYTEA NOT NULL,
            publickey BYTEA NOT NULL,
            withdrawal_credentials BYTEA NOT NULL,
            amount BIGINT NOT NULL,
            signature BYTEA NOT NULL,
            valid_signature BIGINT NOT NULL DEFAULT 0,
            orphaned BOOLEAN NOT NULL DEFAULT FALSE,
            tx_hash BYTEA NOT NULL,
            tx_sender BYTEA NOT NULL,
            tx_target BYTEA NOT NULL,
            PRIMARY KEY (deposit_index, block_root)
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS deposit_txs (
            deposit_index INTEGER NOT NULL,
            block_number INTEGER NOT NULL,
            block_time INTEGER NOT NULL DEFAULT 0,
            block_root BLOB NOT NULL,
            publickey BLOB NOT NULL,
            withdrawal_credentials BLOB NOT NULL,
            amount INTEGER NOT NULL,
            signature BLOB NOT NULL,
            valid_signature INTEGER NOT NULL DEFAULT 0,
            orphaned INTEGER NOT NULL DEFAULT 0,
            tx_hash BLOB NOT NULL,
            tx_sender BLOB NOT NULL,
            tx_target BLOB NOT NULL,
            PRIMARY KEY (deposit_index, block_root)
        )",
    },
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS deposits (
            deposit_index BIGINT,
            slot_number BIGINT NOT NULL,
            slot_index BIGINT NOT NULL,
            slot_root BYTEA NOT NULL,
            orphaned BOOLEAN NOT NULL DEFAULT FALSE,
            publickey BYTEA NOT NULL,
            withdrawal_credentials BYTEA NOT NULL,
            amount BIGINT NOT NULL,
            PRIMARY KEY (slot_index, slot_root)
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS deposits (
            deposit_index INTEGER,
            slot_number INTEGER NOT NULL,
            slot_index INTEGER NOT NULL,
            slot_root BLOB NOT NULL,
            orphaned INTEGER NOT NULL DEFAULT 0,
            publickey BLOB NOT NULL,
            withdrawal_credentials BLOB NOT NULL,
            amount INTEGER NOT NULL,
            PRIMARY KEY (slot_index, slot_root)
        )",
    },
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS voluntary_exits (
            slot_number BIGINT NOT NULL,
            slot_index BIGINT NOT NULL,
            slot_root BYTEA NOT NULL,
            orphaned BOOLEAN NOT NULL DEFAULT FALSE,
            validator BIGINT NOT NULL,
            PRIMARY KEY (slot_index, slot_root)
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS voluntary_exits (
            slot_number INTEGER NOT NULL,
            slot_index INTEGER NOT NULL,
            slot_root BLOB NOT NULL,
            orphaned INTEGER NOT NULL DEFAULT 0,
            validator INTEGER NOT NULL,
            PRIMARY KEY (slot_index, slot_root)
        )",
    },
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS slashings (
            slot_number BIGINT NOT NULL,
            slot_index BIGINT NOT NULL,
            slot_root BYTEA NOT NULL,
            orphaned BOOLEAN NOT NULL DEFAULT FALSE,
            validator BIGINT NOT NULL,
            slasher BIGINT NOT NULL,
            reason BIGINT NOT NULL,
            PRIMARY KEY (slot_index, slot_root, validator)
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS slashings (
            slot_number INTEGER NOT NULL,
            slot_index INTEGER NOT NULL,
            slot_root BLOB NOT NULL,
            orphaned INTEGER NOT NULL DEFAULT 0,
            validator INTEGER NOT NULL,
            slasher INTEGER NOT NULL,
            reason INTEGER NOT NULL,
            PRIMARY KEY (slot_index, slot_root, validator)
        )",
    },
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS consolidations (
            slot_number BIGINT NOT NULL,
            slot_index BIGINT NOT NULL,
            slot_root BYTEA NOT NULL,
            orphaned BOOLEAN NOT NULL DEFAULT FALSE,
            source_index BIGINT NOT NULL,
            target_index BIGINT NOT NULL,
            epoch BIGINT NOT NULL,
            PRIMARY KEY (slot_index, slot_root)
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS consolidations (
            slot_number INTEGER NOT NULL,
            slot_index INTEGER NOT NULL,
            slot_root BLOB NOT NULL,
            orphaned INTEGER NOT NULL DEFAULT 0,
            source_index INTEGER NOT NULL,
            target_index INTEGER NOT NULL,
            epoch INTEGER NOT NULL,
            PRIMARY KEY (slot_index, slot_root)
        )",
    },
    EngineQuery {
        pgsql: "CREATE INDEX IF NOT EXISTS consolidations_source_idx
            ON consolidations (source_index)",
        sqlite: "CREATE INDEX IF NOT EXISTS consolidations_source_idx
            ON consolidations (source_index)",
    },
    EngineQuery {
        pgsql: "CREATE INDEX IF NOT EXISTS consolidations_target_idx
            ON consolidations (target_index)",
        sqlite: "CREATE INDEX IF NOT EXISTS consolidations_target_idx
            ON consolidations (target_index)",
    },
    EngineQuery {
        pgsql: "CREATE INDEX IF NOT EXISTS consolidations_epoch_idx
            ON consolidations (epoch)",
        sqlite: "CREATE INDEX IF NOT EXISTS consolidations_epoch_idx
            ON consolidations (epoch)",
    },
    EngineQuery {
        pgsql: "CREATE INDEX IF NOT EXISTS consolidations_slot_number_idx
            ON consolidations (slot_number)",
        sqlite: "CREATE INDEX IF NOT EXISTS consolidations_slot_number_idx
            ON consolidations (slot_number)",
    },
    EngineQuery {
        pgsql: "CREATE TABLE IF NOT EXISTS explorer_state (
            key TEXT NOT NULL PRIMARY KEY,
            value TEXT NOT NULL
        )",
        sqlite: "CREATE TABLE IF NOT EXISTS explorer_state (
            key TEXT NOT NULL PRIMARY KEY,
            value TEXT NOT NULL
        )",
    },
];

pub async fn apply_schema(store: &Store) -> Result<()> {
    store
        .run_transaction(|tx| {
            for statement in STATEMENTS {
                tx.execute(*statement, &[])?;
            }

            Ok(())
        })
        .await
}
