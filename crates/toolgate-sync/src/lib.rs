//! Concurrency primitives shared by the gate: a FIFO async mutex, a keyed
//! pool of them and a TTL-bound idempotency ledger.

mod ledger;
mod mutex;

pub use ledger::{
    EntryState, Executed, IdempotencyEntry, IdempotencyLedger, LedgerConfig, LedgerError,
};
pub use mutex::{Mutex, MutexGuard, NamedMutexManager};
