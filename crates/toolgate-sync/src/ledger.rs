//! Keyed idempotency ledger.
//!
//! Collapses concurrent invocations of the same keyed operation into a single
//! execution: the first caller runs it, every other caller waits and observes
//! the same result or the same error. Entries expire after a TTL and are
//! removed lazily on read and by a background sweep.
//!
//! Waiters are woken through a watch channel whenever any entry changes, and
//! additionally re-check every `poll_interval` so TTL expiry of a stuck
//! pending entry is noticed without a sweep.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use toolgate_protocol::GateError;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    #[serde(with = "duration_ms")]
    pub default_ttl: Duration,
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    #[serde(with = "duration_ms")]
    pub wait_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub sweep_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_millis(100),
            wait_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl LedgerConfig {
    /// Shortest poll or sweep period accepted.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// Raise zero periods to [`Self::MIN_INTERVAL`].
    pub fn normalized(self) -> Self {
        Self {
            poll_interval: self.poll_interval.max(Self::MIN_INTERVAL),
            sweep_interval: self.sweep_interval.max(Self::MIN_INTERVAL),
            ..self
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("idempotency entry {key} expired before the operation finished")]
    Expired { key: String },
    #[error("timed out after {waited_ms}ms waiting for in-flight operation {key}")]
    WaitTimeout { key: String, waited_ms: u64 },
    #[error("operation {key} failed: {message}")]
    OperationFailed { key: String, message: String },
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Expired { .. } | Self::WaitTimeout { .. })
    }
}

impl From<LedgerError> for GateError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::Expired { key } => GateError::IdempotencyExpired { key },
            LedgerError::WaitTimeout { key, waited_ms } => {
                GateError::IdempotencyTimeout { key, waited_ms }
            }
            LedgerError::OperationFailed { key, message } => {
                GateError::OperationFailed { key, message }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState<T> {
    Pending,
    Completed(T),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct IdempotencyEntry<T> {
    pub key: String,
    pub state: EntryState<T>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Instant,
}

impl<T> IdempotencyEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of [`IdempotencyLedger::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed<T> {
    pub result: T,
    /// False only for the caller that actually ran the operation.
    pub cached: bool,
}

struct LedgerInner<T> {
    config: LedgerConfig,
    entries: parking_lot::Mutex<HashMap<String, IdempotencyEntry<T>>>,
    changed: watch::Sender<u64>,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<T> LedgerInner<T> {
    fn notify(&self) {
        self.changed.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            before - entries.len()
        };
        if removed > 0 {
            self.notify();
        }
        removed
    }
}

/// In-memory idempotency ledger. Cloning shares the same entries.
///
/// Use one ledger per logical domain (approvals, pairing, task creation) so
/// TTLs and key spaces stay independent.
pub struct IdempotencyLedger<T> {
    inner: Arc<LedgerInner<T>>,
}

impl<T> Clone for IdempotencyLedger<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for IdempotencyLedger<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyLedger")
            .field("config", &self.inner.config)
            .field("entries", &self.inner.entries.lock().len())
            .finish()
    }
}

impl<T> Default for IdempotencyLedger<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl<T> IdempotencyLedger<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: LedgerConfig) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(LedgerInner {
                config: config.normalized(),
                entries: parking_lot::Mutex::new(HashMap::new()),
                changed,
                sweeper: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.inner.config
    }

    /// Join an operation name and its defined arguments with `:`.
    pub fn make_key(operation: &str, args: &[Option<&str>]) -> String {
        std::iter::once(operation)
            .chain(args.iter().flatten().copied())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Current entry for `key`. Expired entries are evicted and reported as
    /// absent.
    pub fn check(&self, key: &str) -> Option<IdempotencyEntry<T>> {
        let mut entries = self.inner.entries.lock();
        let expired = entries.get(key)?.is_expired(Instant::now());
        if expired {
            entries.remove(key);
            drop(entries);
            self.inner.notify();
            return None;
        }
        entries.get(key).cloned()
    }

    /// Insert a pending entry. False if a live entry already exists.
    pub fn start(&self, key: &str, ttl: Option<Duration>) -> bool {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        if entries.get(key).is_some_and(|entry| !entry.is_expired(now)) {
            return false;
        }
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        entries.insert(
            key.to_owned(),
            IdempotencyEntry {
                key: key.to_owned(),
                state: EntryState::Pending,
                created_at: Utc::now(),
                expires_at: now + ttl,
            },
        );
        true
    }

    /// Record the result of a pending entry. No-op unless the entry exists
    /// and is still pending.
    pub fn complete(&self, key: &str, result: T) -> bool {
        self.transition(key, EntryState::Completed(result))
    }

    /// Record the failure of a pending entry. No-op unless the entry exists
    /// and is still pending.
    pub fn fail(&self, key: &str, error: impl Display) -> bool {
        self.transition(key, EntryState::Failed(error.to_string()))
    }

    fn transition(&self, key: &str, state: EntryState<T>) -> bool {
        let transitioned = {
            let mut entries = self.inner.entries.lock();
            match entries.get_mut(key) {
                Some(entry) if matches!(entry.state, EntryState::Pending) => {
                    entry.state = state;
                    true
                }
                _ => false,
            }
        };
        if transitioned {
            self.inner.notify();
        }
        transitioned
    }

    pub fn remove(&self, key: &str) -> bool {
        let removed = self.inner.entries.lock().remove(key).is_some();
        if removed {
            self.inner.notify();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Remove every expired entry now.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    /// Run `operation` at most once per live `key`.
    ///
    /// The first caller runs the operation and records its outcome; every
    /// concurrent caller waits for that outcome. A completed entry is
    /// returned with `cached = true`; a failed one replays its error until it
    /// expires. If the running caller is dropped before the operation
    /// finishes, the entry is removed and its waiters see `Expired`.
    #[instrument(skip(self, key, operation), fields(key = %key))]
    pub async fn execute<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        operation: F,
    ) -> Result<Executed<T>, LedgerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if let Some(IdempotencyEntry {
            state: EntryState::Completed(result),
            ..
        }) = self.check(key)
        {
            debug!("returning cached result");
            return Ok(Executed {
                result,
                cached: true,
            });
        }

        if !self.start(key, ttl) {
            debug!("operation in flight; waiting");
            return self.wait_for(key).await;
        }

        let mut in_flight = InFlight {
            ledger: self,
            key,
            armed: true,
        };
        let outcome = operation().await;
        in_flight.armed = false;

        match outcome {
            Ok(result) => {
                self.complete(key, result.clone());
                Ok(Executed {
                    result,
                    cached: false,
                })
            }
            Err(error) => {
                let message = error.to_string();
                self.fail(key, &message);
                Err(LedgerError::OperationFailed {
                    key: key.to_owned(),
                    message,
                })
            }
        }
    }

    async fn wait_for(&self, key: &str) -> Result<Executed<T>, LedgerError> {
        let config = &self.inner.config;
        let started = Instant::now();
        let deadline = started + config.wait_timeout;
        let mut changes = self.inner.changed.subscribe();

        loop {
            match self.check(key) {
                None => {
                    return Err(LedgerError::Expired {
                        key: key.to_owned(),
                    });
                }
                Some(entry) => match entry.state {
                    EntryState::Completed(result) => {
                        return Ok(Executed {
                            result,
                            cached: true,
                        });
                    }
                    EntryState::Failed(message) => {
                        return Err(LedgerError::OperationFailed {
                            key: key.to_owned(),
                            message,
                        });
                    }
                    EntryState::Pending => {}
                },
            }

            let now = Instant::now();
            if now >= deadline {
                let waited_ms = now.duration_since(started).as_millis() as u64;
                warn!(waited_ms, "gave up waiting for in-flight operation");
                return Err(LedgerError::WaitTimeout {
                    key: key.to_owned(),
                    waited_ms,
                });
            }
            let wake_after = (deadline - now).min(config.poll_interval);
            let _ = tokio::time::timeout(wake_after, changes.changed()).await;
        }
    }

    /// Spawn the periodic expiry sweep. Calling it again is a no-op.
    ///
    /// Must be called from within a tokio runtime. The task holds only a weak
    /// reference and exits once every ledger handle is dropped.
    pub fn start_sweeper(&self) {
        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let weak: Weak<LedgerInner<T>> = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = inner.sweep_expired();
                if removed > 0 {
                    debug!(removed, "swept expired idempotency entries");
                }
            }
        }));
    }

    /// Stop the sweep and drop every entry. Pending waiters observe
    /// `Expired`.
    pub fn destroy(&self) {
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        self.inner.entries.lock().clear();
        self.inner.notify();
    }
}

/// Removes the pending entry if the running caller goes away mid-operation.
struct InFlight<'a, T>
where
    T: Clone + Send + Sync + 'static,
{
    ledger: &'a IdempotencyLedger<T>,
    key: &'a str,
    armed: bool,
}

impl<T> Drop for InFlight<'_, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.armed {
            warn!(key = %self.key, "operation abandoned before completion");
            self.ledger.remove(self.key);
        }
    }
}
