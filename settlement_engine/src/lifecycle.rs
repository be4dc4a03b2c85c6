//! The order state machine.
//!
//! Every status change in the system is decided by [`next_status`]. The settlement engine, the sell/settle toggle,
//! the journal engine and the broker payment step each own a disjoint subset of events, but none of them may write
//! a status the transition function has not approved. The database layer then applies the approved transition with
//! a compare-and-swap on the current status, so a concurrent writer shows up as a lost update rather than a silent
//! overwrite.
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::OrderStatus;

//--------------------------------------      OrderEvent     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    /// The basket was swept to the broker.
    Sweep,
    /// The broker reported an execution for the order.
    Execute,
    /// Post-trade confirmation arrived.
    Confirm,
    /// The merchant's broker invoice cleared; the order's paid batch settles.
    Settle,
    /// Administrator moved the order into the sell workflow.
    MarkSell,
    /// Administrator moved the order back out of the sell workflow.
    MarkSettled,
    /// The sell completed at the broker.
    CompleteSell,
    /// Funds for the order were journaled to the member's sub-account.
    Journal,
    Fail,
    Cancel,
}

impl Display for OrderEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderEvent::Sweep => "sweep",
            OrderEvent::Execute => "execute",
            OrderEvent::Confirm => "confirm",
            OrderEvent::Settle => "settle",
            OrderEvent::MarkSell => "mark_sell",
            OrderEvent::MarkSettled => "mark_settled",
            OrderEvent::CompleteSell => "complete_sell",
            OrderEvent::Journal => "journal",
            OrderEvent::Fail => "fail",
            OrderEvent::Cancel => "cancel",
        };
        write!(f, "{s}")
    }
}

//--------------------------------------  InvalidTransition  ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event '{event}' is not legal from status '{from}'")]
pub struct InvalidTransition {
    pub from: OrderStatus,
    pub event: OrderEvent,
}

//--------------------------------------     next_status     ---------------------------------------------------------
/// The complete transition table.
///
/// The happy path is `placed → queued → executed → confirmed → settled`, after which the toggle service may bounce
/// the order between `settled` and `sell`, the sell workflow may finish it as `sold`, and the journal engine may
/// move it to `journaled`. `failed` and `cancelled` are reachable from every pre-settled state. A batch whose broker
/// confirmations never arrived may still settle from `executed` once the merchant invoice has cleared.
pub fn next_status(current: OrderStatus, event: OrderEvent) -> Result<OrderStatus, InvalidTransition> {
    use OrderEvent::*;
    use OrderStatus::*;
    match (current, event) {
        (Placed, Sweep) => Ok(Queued),
        (Queued, Execute) => Ok(Executed),
        (Executed, Confirm) => Ok(Confirmed),
        (Executed | Confirmed, Settle) => Ok(Settled),
        (Settled, MarkSell) => Ok(Sell),
        (Sell, MarkSettled) => Ok(Settled),
        (Sell, CompleteSell) => Ok(Sold),
        // Funds can be journaled after the admin sell workflow as well as from a plain settlement.
        (Settled | Sell | Sold, Journal) => Ok(Journaled),
        (Placed | Queued | Executed | Confirmed, Fail) => Ok(Failed),
        (Placed | Queued | Executed | Confirmed, Cancel) => Ok(Cancelled),
        (from, event) => Err(InvalidTransition { from, event }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db_types::OrderStatus::*;

    const ALL_STATUSES: [OrderStatus; 10] =
        [Placed, Queued, Executed, Confirmed, Settled, Sell, Sold, Journaled, Failed, Cancelled];

    const ALL_EVENTS: [OrderEvent; 10] = [
        OrderEvent::Sweep,
        OrderEvent::Execute,
        OrderEvent::Confirm,
        OrderEvent::Settle,
        OrderEvent::MarkSell,
        OrderEvent::MarkSettled,
        OrderEvent::CompleteSell,
        OrderEvent::Journal,
        OrderEvent::Fail,
        OrderEvent::Cancel,
    ];

    #[test]
    fn happy_path() {
        let mut status = Placed;
        for event in [OrderEvent::Sweep, OrderEvent::Execute, OrderEvent::Confirm, OrderEvent::Settle] {
            status = next_status(status, event).unwrap();
        }
        assert_eq!(status, Settled);
        assert_eq!(next_status(Settled, OrderEvent::Journal).unwrap(), Journaled);
    }

    #[test]
    fn toggle_is_reversible_until_sold() {
        assert_eq!(next_status(Settled, OrderEvent::MarkSell).unwrap(), Sell);
        assert_eq!(next_status(Sell, OrderEvent::MarkSettled).unwrap(), Settled);
        assert_eq!(next_status(Sell, OrderEvent::CompleteSell).unwrap(), Sold);
        assert!(next_status(Sold, OrderEvent::MarkSettled).is_err());
    }

    #[test]
    fn settle_allowed_from_executed_without_confirmation() {
        assert_eq!(next_status(Executed, OrderEvent::Settle).unwrap(), Settled);
    }

    #[test]
    fn journal_reachable_after_sell_workflow() {
        assert_eq!(next_status(Sell, OrderEvent::Journal).unwrap(), Journaled);
        assert_eq!(next_status(Sold, OrderEvent::Journal).unwrap(), Journaled);
    }

    #[test]
    fn failure_and_cancellation_only_pre_settlement() {
        for status in [Placed, Queued, Executed, Confirmed] {
            assert_eq!(next_status(status, OrderEvent::Fail).unwrap(), Failed);
            assert_eq!(next_status(status, OrderEvent::Cancel).unwrap(), Cancelled);
        }
        for status in [Settled, Sell, Sold, Journaled] {
            assert!(next_status(status, OrderEvent::Fail).is_err());
            assert!(next_status(status, OrderEvent::Cancel).is_err());
        }
    }

    #[test]
    fn terminal_states_reject_every_event() {
        for status in [Journaled, Failed, Cancelled] {
            for event in ALL_EVENTS {
                assert!(next_status(status, event).is_err(), "{status} should reject {event}");
            }
        }
        // Sold is terminal for everything except journaling.
        for event in ALL_EVENTS {
            let result = next_status(Sold, event);
            if event == OrderEvent::Journal {
                assert!(result.is_ok());
            } else {
                assert!(result.is_err(), "sold should reject {event}");
            }
        }
    }

    #[test]
    fn no_back_edges_outside_the_toggle() {
        // The only legal back-edge in the whole table is sell → settled.
        let rank = |s: OrderStatus| ALL_STATUSES.iter().position(|x| *x == s).unwrap();
        for from in ALL_STATUSES {
            for event in ALL_EVENTS {
                if let Ok(to) = next_status(from, event) {
                    if rank(to) < rank(from) {
                        assert_eq!((from, to), (Sell, Settled), "unexpected back-edge {from} -> {to}");
                    }
                }
            }
        }
    }
}
