use std::sync::{Arc, RwLock};

use types::{
    config::ChainConfig,
    containers::Checkpoint,
    primitives::{Epoch, Slot, H256},
};

/// Tracks the finalized checkpoint and provides slot and epoch arithmetic.
///
/// The checkpoint only ever advances. All components read the finalized
/// boundary from here, so a finalization event becomes visible to the caches
/// the moment the driver publishes it.
pub struct ChainState {
    config: Arc<ChainConfig>,
    finalized: RwLock<Checkpoint>,
}

impl ChainState {
    #[must_use]
    pub fn new(config: Arc<ChainConfig>) -> Self {
        Self {
            config,
            finalized: RwLock::new(Checkpoint {
                epoch: 0,
                root: H256::zero(),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    #[must_use]
    pub fn finalized_checkpoint(&self) -> Checkpoint {
        *self
            .finalized
            .read()
            .expect("finalized checkpoint lock is poisoned")
    }

    #[must_use]
    pub fn finalized_epoch(&self) -> Epoch {
        self.finalized_checkpoint().epoch
    }

    #[must_use]
    pub fn finalized_slot(&self) -> Slot {
        self.config
            .start_slot_of_epoch(self.finalized_checkpoint().epoch)
    }

    /// Advances the finalized checkpoint. Stale updates are ignored.
    pub fn set_finalized_checkpoint(&self, epoch: Epoch, root: H256) -> bool {
        let mut finalized = self
            .finalized
            .write()
            .expect("finalized checkpoint lock is poisoned");

        if epoch < finalized.epoch || (epoch == finalized.epoch && finalized.root != H256::zero()) {
            return false;
        }

        *finalized = Checkpoint { epoch, root };

        true
    }

    #[must_use]
    pub fn epoch_of_slot(&self, slot: Slot) -> Epoch {
        self.config.epoch_of_slot(slot)
    }

    #[must_use]
    pub fn start_slot_of_epoch(&self, epoch: Epoch) -> Slot {
        self.config.start_slot_of_epoch(epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_only_advances() {
        let chain_state = ChainState::new(Arc::new(ChainConfig::minimal()));

        assert!(chain_state.set_finalized_checkpoint(5, H256::repeat_byte(1)));
        assert_eq!(chain_state.finalized_slot(), 40);

        assert!(!chain_state.set_finalized_checkpoint(4, H256::repeat_byte(2)));
        assert!(!chain_state.set_finalized_checkpoint(5, H256::repeat_byte(2)));
        assert_eq!(chain_state.finalized_checkpoint().root, H256::repeat_byte(1));

        assert!(chain_state.set_finalized_checkpoint(6, H256::repeat_byte(3)));
        assert_eq!(chain_state.finalized_epoch(), 6);
    }
}
