pub mod codec;
pub mod config;
pub mod containers;
pub mod primitives;
pub mod serde_utils;
