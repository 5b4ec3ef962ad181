//! CSV driver: commands in, wallets out.

pub mod command_reader;
pub mod wallet_writer;
