//! Application layer: the components that move money and the engine that
//! composes them.
//!
//! Every balance change goes through `TransferEngine`, which runs it as one
//! atomic unit over the per-key locks in `locks`.

pub mod cache;
pub mod engine;
pub mod ledger;
pub mod limits;
pub mod locks;
pub mod qr;
pub mod reporting;
pub mod wallet_store;
