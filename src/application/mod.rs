//! Application layer: the sale engine, the wallet-transaction use cases and
//! the coordinator that serializes sale mutations and closes sub-rounds on
//! schedule. Everything here talks to storage through `domain::ports`.

pub mod coordinator;
pub mod sale;
pub mod tx;
pub mod wallet;
