// ============================================================================
// Scripted Backend
// ============================================================================
//
// Deterministic stand-in for a database. Every `connect()` consumes the next
// `ScriptStep`, which decides how that session behaves. Once the script is
// used up the fallback step repeats forever. Everything that happens is
// appended to an event log the tests can inspect.
//
// ============================================================================

use super::{Connection, ConnectionProvider, IsolationLevel, TargetTable};
use crate::core::{Color, ColorTransition, Result, SkewError};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Behaviour of one scripted session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    /// Everything succeeds
    Commit,
    /// The commit is rejected with a serialization failure
    ConflictOnCommit,
    /// `connect()` fails, as if the server went away
    Unreachable,
    /// The update statement fails with a non-conflict error
    FailOnUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    Connect { session: usize },
    ConnectRefused { session: usize },
    Begin { session: usize, isolation: IsolationLevel },
    Update { session: usize, transition: ColorTransition, rows: u64 },
    Commit { session: usize },
    CommitRejected { session: usize },
    Rollback { session: usize },
    Release { session: usize },
}

struct Shared {
    steps: VecDeque<ScriptStep>,
    fallback: ScriptStep,
    rows: Vec<Color>,
    events: Vec<ScriptEvent>,
    sessions: usize,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone)]
pub struct ScriptedProvider {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedProvider {
    /// Script over a table seeded with `seed`; the fallback is `Commit`
    pub fn new(seed: &[Color], steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                steps: steps.into_iter().collect(),
                fallback: ScriptStep::Commit,
                rows: seed.to_vec(),
                events: Vec::new(),
                sessions: 0,
            })),
        }
    }

    pub fn with_fallback(self, fallback: ScriptStep) -> Self {
        lock(&self.shared).fallback = fallback;
        self
    }

    pub fn events(&self) -> Vec<ScriptEvent> {
        lock(&self.shared).events.clone()
    }

    /// Calls to `connect()`, refused ones included
    pub fn connect_attempts(&self) -> usize {
        lock(&self.shared).sessions
    }

    pub fn commits(&self) -> usize {
        self.count(|event| matches!(event, ScriptEvent::Commit { .. }))
    }

    pub fn rejected_commits(&self) -> usize {
        self.count(|event| matches!(event, ScriptEvent::CommitRejected { .. }))
    }

    /// Committed table contents
    pub fn rows(&self) -> Vec<Color> {
        lock(&self.shared).rows.clone()
    }

    fn count(&self, predicate: impl Fn(&ScriptEvent) -> bool) -> usize {
        lock(&self.shared)
            .events
            .iter()
            .filter(|event| predicate(*event))
            .count()
    }
}

#[async_trait]
impl ConnectionProvider for ScriptedProvider {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let mut shared = lock(&self.shared);
        shared.sessions += 1;
        let session = shared.sessions;
        let step = match shared.steps.pop_front() {
            Some(step) => step,
            None => shared.fallback,
        };

        if step == ScriptStep::Unreachable {
            shared.events.push(ScriptEvent::ConnectRefused { session });
            return Err(SkewError::Connection(format!(
                "session {session}: connection refused"
            )));
        }

        shared.events.push(ScriptEvent::Connect { session });
        Ok(Box::new(ScriptedConnection {
            shared: Arc::clone(&self.shared),
            session,
            step,
            txn: None,
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedConnection {
    shared: Arc<Mutex<Shared>>,
    session: usize,
    step: ScriptStep,
    /// Snapshot taken at `BEGIN` plus the rows this session rewrote
    txn: Option<(Vec<Color>, BTreeMap<usize, Color>)>,
}

impl ScriptedConnection {
    fn record(&self, event: ScriptEvent) {
        lock(&self.shared).events.push(event);
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        if self.txn.is_some() {
            return Err(SkewError::Execution("Transaction already active".into()));
        }
        let snapshot = lock(&self.shared).rows.clone();
        self.txn = Some((snapshot, BTreeMap::new()));
        self.record(ScriptEvent::Begin {
            session: self.session,
            isolation,
        });
        Ok(())
    }

    async fn update_colors(
        &mut self,
        _target: &TargetTable,
        transition: ColorTransition,
    ) -> Result<u64> {
        if self.step == ScriptStep::FailOnUpdate {
            return Err(SkewError::Execution(format!(
                "session {}: scripted update failure",
                self.session
            )));
        }

        let (snapshot, writes) = self
            .txn
            .as_mut()
            .ok_or_else(|| SkewError::Execution("No active transaction".into()))?;

        let mut rows = 0;
        for (index, value) in snapshot.iter_mut().enumerate() {
            if transition.matches(*value) {
                *value = transition.to;
                writes.insert(index, transition.to);
                rows += 1;
            }
        }

        self.record(ScriptEvent::Update {
            session: self.session,
            transition,
            rows,
        });
        Ok(rows)
    }

    async fn commit(&mut self) -> Result<()> {
        let (_, writes) = self
            .txn
            .take()
            .ok_or_else(|| SkewError::Execution("No active transaction".into()))?;

        if self.step == ScriptStep::ConflictOnCommit {
            self.record(ScriptEvent::CommitRejected {
                session: self.session,
            });
            return Err(SkewError::Serialization(format!(
                "session {}: could not serialize access due to read/write dependencies among transactions",
                self.session
            )));
        }

        let mut shared = lock(&self.shared);
        for (index, value) in writes {
            if let Some(row) = shared.rows.get_mut(index) {
                *row = value;
            }
        }
        shared.events.push(ScriptEvent::Commit {
            session: self.session,
        });
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.txn.take().is_some() {
            self.record(ScriptEvent::Rollback {
                session: self.session,
            });
        }
        Ok(())
    }

    async fn select_colors(&mut self, _target: &TargetTable) -> Result<Vec<Color>> {
        Ok(lock(&self.shared).rows.clone())
    }

    fn is_in_transaction(&self) -> bool {
        self.txn.is_some()
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        if self.txn.take().is_some() {
            shared.events.push(ScriptEvent::Rollback {
                session: self.session,
            });
        }
        shared.events.push(ScriptEvent::Release {
            session: self.session,
        });
    }
}
