pub mod block;
pub mod builder;
pub mod chain;
pub mod codec;
pub mod config;
pub mod consensus;
pub mod fee_market;
pub mod genesis;
pub mod gossip;
pub mod ledger;
pub mod mempool;
pub mod overlay;
pub mod pow;
pub mod query;
pub mod runtime;
pub mod storage;
pub mod transaction;
pub mod types;

#[cfg(test)]
mod test_utils;
