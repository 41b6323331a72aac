pub use primitive_types::{H160, H256, H384, H768};

pub type Slot = u64;
pub type Epoch = u64;
pub type ForkId = u64;
pub type ValidatorIndex = u64;
pub type DepositIndex = u64;
pub type Gwei = u64;
pub type UnixSeconds = u64;

pub type ExecutionAddress = H160;
pub type ExecutionBlockHash = H256;
pub type ExecutionBlockNumber = u64;

pub type PublicKeyBytes = H384;
pub type SignatureBytes = H768;
