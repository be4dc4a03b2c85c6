//! Settlement Engine
//!
//! The settlement engine carries a loyalty-points purchase from the moment the order is handed over by the
//! conversion flow to the moment the cash sits in the member's own brokerage sub-account. This library contains
//! the core logic; it is broker-agnostic.
//!
//! The library is divided into three main sections:
//! 1. Storage management and control ([`mod@sqlite`] and the contracts in [`mod@traits`]). SQLite is the supported
//!    backend. You should never need to access the store directly; use the public APIs instead. The exception is
//!    the record types, which are defined in [`mod@db_types`] and are public.
//! 2. The engine public API ([`mod@se_api`]): the settlement flow, the sell/settle toggle, the journal engine,
//!    broker payment exports and the data-quality profile. A backend acts as the engine's store by implementing
//!    the traits in [`mod@traits`].
//! 3. Events ([`mod@events`]). Order transitions and journal completions are published on a simple pub-sub
//!    channel so downstream consumers (notifications, audit sinks) can hook in without touching the engine.
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod lifecycle;
pub mod se_api;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use se_api::{
    JournalApi,
    JournalConfig,
    OrderQueryFilter,
    PaymentsApi,
    ProfileApi,
    ProfileConfig,
    SettlementApi,
    SettlementConfig,
    ToggleApi,
};
pub use traits::{BrokerageClient, LedgerApiError, LedgerManagement, SettlementDatabase, SettlementError};
