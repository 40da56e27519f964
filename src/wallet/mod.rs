// Wallet and transaction building

mod address;
mod keystore;
mod tx_builder;

pub use address::Address;
pub use keystore::{KeyPair, Keystore};
pub use tx_builder::TransactionBuilder;
