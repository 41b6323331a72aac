use hex_literal::hex;

use crate::primitives::{Epoch, ExecutionAddress, Slot};

/// Chain-level parameters the indexer needs for slot and epoch arithmetic.
///
/// Unlike a full consensus client this does not carry fork schedules or
/// preset constants. Slot timing is owned by the upstream nodes; the indexer
/// only ever converts between slots and epochs.
#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub slots_per_epoch: u64,
    pub deposit_contract_address: ExecutionAddress,
}

impl ChainConfig {
    #[must_use]
    pub fn mainnet() -> Self {
        Self {
            slots_per_epoch: 32,
            deposit_contract_address: ExecutionAddress::from(hex!(
                "00000000219ab540356cbb839cbe05303d7705fa"
            )),
        }
    }

    /// Small-epoch configuration for tests, matching the minimal preset.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            slots_per_epoch: 8,
            deposit_contract_address: ExecutionAddress::repeat_byte(0x42),
        }
    }

    #[must_use]
    pub const fn epoch_of_slot(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch
    }

    #[must_use]
    pub const fn start_slot_of_epoch(&self, epoch: Epoch) -> Slot {
        epoch * self.slots_per_epoch
    }

    #[must_use]
    pub const fn is_epoch_start(&self, slot: Slot) -> bool {
        slot % self.slots_per_epoch == 0
    }
}
