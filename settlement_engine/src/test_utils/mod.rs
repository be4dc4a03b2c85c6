//! Helpers for integration tests: a disposable SQLite store, seed data and a scriptable brokerage client.

pub mod mock_brokerage;
pub mod prepare_env;
pub mod seed;
