//! AUGUR: multi-model consensus agent for prediction markets.
//!
//! Voters (remote models) are polled concurrently per market, their
//! ballots are reduced to a single sized Decision, and Decisions are
//! scored as markets resolve. The binary schedules these passes and
//! serves the dashboard API.

pub mod config;
pub mod dashboard;
pub mod data;
pub mod engine;
pub mod llm;
pub mod platforms;
pub mod storage;
pub mod strategy;
pub mod types;
