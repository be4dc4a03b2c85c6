//! A scriptable in-memory [`BrokerageClient`] for tests.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use lbp_common::Cents;

use crate::{
    db_types::MemberId,
    traits::{BrokerageClient, TransferError},
};

#[derive(Debug, Clone, PartialEq)]
pub struct TransferCall {
    pub member_id: MemberId,
    pub account_id: String,
    pub amount: Cents,
    pub reference: String,
}

/// Records every transfer request and returns scripted outcomes.
///
/// By default every transfer succeeds with a sequential `BJ-xxxx` id. Individual members can be scripted to fail,
/// and a global delay can be set to drive the engine's timeout path.
#[derive(Debug, Default)]
pub struct MockBrokerage {
    failures: Mutex<HashMap<MemberId, TransferError>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<TransferCall>>,
    counter: AtomicU64,
}

impl MockBrokerage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the next transfers for this member to fail with the given error.
    pub fn fail_member(&self, member_id: impl Into<MemberId>, error: TransferError) {
        self.failures.lock().unwrap().insert(member_id.into(), error);
    }

    /// Delays every transfer by the given duration before responding.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<TransferCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl BrokerageClient for MockBrokerage {
    async fn transfer_to_sub_account(
        &self,
        member_id: &MemberId,
        account_id: &str,
        amount: Cents,
        reference: &str,
    ) -> Result<String, TransferError> {
        self.calls.lock().unwrap().push(TransferCall {
            member_id: member_id.clone(),
            account_id: account_id.to_string(),
            amount,
            reference: reference.to_string(),
        });
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.failures.lock().unwrap().get(member_id).cloned();
        if let Some(error) = scripted {
            return Err(error);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("BJ-{n:04}"))
    }
}
