//! Pseudonym tables and the generator that fills them.

pub mod generator;
mod store;

pub use generator::{generate, normalize_integer, pool_length, pseudonym_for_seed, ShufflePools};
pub use store::{MappingTable, NEW_VALUE, OLD_VALUE};
