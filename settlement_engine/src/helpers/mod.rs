pub mod ach;

use chrono::Utc;

/// Generates a new paid-batch id for a broker payment run.
///
/// The id only needs to be unique per (merchant, broker) payment confirmation; the random suffix keeps two runs
/// started in the same second apart.
pub fn new_batch_id(merchant_id: &str, broker: &str) -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = rand::random::<u32>();
    format!("ach-{merchant_id}-{broker}-{stamp}-{suffix:08x}")
}
