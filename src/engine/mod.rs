//! Core engine: fan-out voting, the per-market pipeline and the P&L ledger.

pub mod coordinator;
pub mod ledger;
pub mod runner;
