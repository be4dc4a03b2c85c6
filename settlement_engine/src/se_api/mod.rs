//! The public API of the settlement engine.
//!
//! These are the operation contracts the admin UI calls: the settlement flows ([`SettlementApi`]), the bulk
//! sell/settle toggle ([`ToggleApi`]), the journal engine ([`JournalApi`]), the broker payment report and ACH
//! export ([`PaymentsApi`]) and the data-quality profile pass ([`ProfileApi`]). Each API wraps a backend
//! implementing the traits in [`crate::traits`] and publishes transition events for the notification dispatcher.
pub mod journal_api;
pub mod order_objects;
pub mod payments_api;
pub mod profile_api;
pub mod settlement_api;
pub mod toggle_api;

pub use journal_api::{JournalApi, JournalConfig};
pub use order_objects::OrderQueryFilter;
pub use payments_api::PaymentsApi;
pub use profile_api::{ProfileApi, ProfileConfig};
pub use settlement_api::{SettlementApi, SettlementConfig};
pub use toggle_api::ToggleApi;
