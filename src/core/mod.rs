// Core ledger data structures

mod types;
mod transaction;
mod block;
mod merkle;
mod serialize;
mod hash;
pub mod crypto;

pub use types::*;
pub use transaction::*;
pub use block::*;
pub use merkle::{MerkleNode, MerkleTree};
pub use serialize::*;
pub use hash::*;
