//! Domain types and the storage ports the application layer depends on.

pub mod fee;
pub mod limits;
pub mod money;
pub mod ports;
pub mod qr;
pub mod report;
pub mod transaction;
pub mod wallet;
