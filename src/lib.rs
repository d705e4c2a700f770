//! Core trading orchestrator for a multi-user OTO volume-building strategy.
//!
//! See `SPEC_FULL.md` at the repository root for the full component contract.

pub mod config;
pub mod credentials;
pub mod error;
pub mod exchange;
pub mod host;
pub mod listen_key;
pub mod order_stream;
pub mod single_trade;
pub mod status;
pub mod stop;
pub mod strategy_executor;
pub mod tracker;
pub mod batch_loop;
