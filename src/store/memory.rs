use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::{
    AttemptStore, MetaStore, ProblemStore, SessionStateStore, SettingsStore, StoreError,
    StoreResult,
};
use crate::types::{Attempt, Problem, SessionState, UserSettings};

#[derive(Debug, Default)]
struct Tables {
    problems: BTreeMap<String, Problem>,
    attempts: Vec<Attempt>,
    meta: HashMap<String, String>,
    session_state: Option<Value>,
    settings: Option<UserSettings>,
}

#[derive(Debug, Default)]
struct FaultPlan {
    unavailable: bool,
    attempt_reads: HashSet<String>,
    problem_writes: HashSet<String>,
    batch_writes: bool,
    session_state: bool,
}

/// Process-local store. Every trait call takes one lock, so batch writes are all-or-nothing.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    faults: Mutex<FaultPlan>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_problems(problems: impl IntoIterator<Item = Problem>) -> Self {
        let store = Self::new();
        for problem in problems {
            store.insert_problem(problem);
        }
        store
    }

    pub fn insert_problem(&self, problem: Problem) {
        self.tables.write().problems.insert(problem.id.clone(), problem);
    }

    pub fn insert_attempt(&self, attempt: Attempt) {
        self.tables.write().attempts.push(attempt);
    }

    pub fn insert_raw_session_state(&self, raw: Value) {
        self.tables.write().session_state = Some(raw);
    }

    pub fn insert_settings(&self, settings: UserSettings) {
        self.tables.write().settings = Some(settings);
    }

    pub fn problem(&self, id: &str) -> Option<Problem> {
        self.tables.read().problems.get(id).cloned()
    }

    pub fn meta(&self, key: &str) -> Option<String> {
        self.tables.read().meta.get(key).cloned()
    }

    pub fn raw_session_state(&self) -> Option<Value> {
        self.tables.read().session_state.clone()
    }

    /// Every call fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.lock().unavailable = unavailable;
    }

    pub fn fail_attempt_reads_for(&self, problem_id: &str) {
        self.faults.lock().attempt_reads.insert(problem_id.to_string());
    }

    pub fn fail_problem_writes_for(&self, problem_id: &str) {
        self.faults.lock().problem_writes.insert(problem_id.to_string());
    }

    pub fn fail_batch_writes(&self, fail: bool) {
        self.faults.lock().batch_writes = fail;
    }

    pub fn fail_session_state(&self, fail: bool) {
        self.faults.lock().session_state = fail;
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.faults.lock().unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProblemStore for MemoryStore {
    async fn get_problem(&self, id: &str) -> StoreResult<Option<Problem>> {
        self.check_available()?;
        Ok(self.tables.read().problems.get(id).cloned())
    }

    async fn all_problems(&self) -> StoreResult<Vec<Problem>> {
        self.check_available()?;
        Ok(self.tables.read().problems.values().cloned().collect())
    }

    async fn put_problem(&self, problem: &Problem) -> StoreResult<()> {
        self.check_available()?;
        if self.faults.lock().problem_writes.contains(&problem.id) {
            return Err(StoreError::Unavailable(format!("write rejected for {}", problem.id)));
        }
        self.tables.write().problems.insert(problem.id.clone(), problem.clone());
        Ok(())
    }

    async fn put_problems(&self, problems: &[Problem]) -> StoreResult<()> {
        self.check_available()?;
        {
            let faults = self.faults.lock();
            if faults.batch_writes || problems.iter().any(|p| faults.problem_writes.contains(&p.id)) {
                return Err(StoreError::Unavailable("batch write aborted".to_string()));
            }
        }
        let mut tables = self.tables.write();
        for problem in problems {
            tables.problems.insert(problem.id.clone(), problem.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn put_attempt(&self, attempt: &Attempt) -> StoreResult<()> {
        self.check_available()?;
        self.tables.write().attempts.push(attempt.clone());
        Ok(())
    }

    async fn attempts_for_problem(&self, problem_id: &str) -> StoreResult<Vec<Attempt>> {
        self.check_available()?;
        if self.faults.lock().attempt_reads.contains(problem_id) {
            return Err(StoreError::Unavailable(format!("attempt index unreadable for {problem_id}")));
        }
        let mut attempts: Vec<Attempt> = self
            .tables
            .read()
            .attempts
            .iter()
            .filter(|a| a.problem_id == problem_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_date);
        Ok(attempts)
    }

    async fn latest_attempt_date(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.check_available()?;
        Ok(self.tables.read().attempts.iter().map(|a| a.attempt_date).max())
    }
}

#[async_trait]
impl MetaStore for MemoryStore {
    async fn get_meta(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        Ok(self.tables.read().meta.get(key).cloned())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: Option<&str>,
    ) -> StoreResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.write();
        if tables.meta.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        match value {
            Some(v) => {
                tables.meta.insert(key.to_string(), v.to_string());
            }
            None => {
                tables.meta.remove(key);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl SessionStateStore for MemoryStore {
    async fn load_session_state(&self) -> StoreResult<Option<Value>> {
        self.check_available()?;
        if self.faults.lock().session_state {
            return Err(StoreError::Unavailable("session state unreadable".to_string()));
        }
        Ok(self.tables.read().session_state.clone())
    }

    async fn save_session_state(&self, state: &SessionState) -> StoreResult<()> {
        self.check_available()?;
        if self.faults.lock().session_state {
            return Err(StoreError::Unavailable("session state unwritable".to_string()));
        }
        let value = serde_json::to_value(state)?;
        self.tables.write().session_state = Some(value);
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn load_settings(&self) -> StoreResult<Option<UserSettings>> {
        self.check_available()?;
        Ok(self.tables.read().settings.clone())
    }

    async fn save_settings(&self, settings: &UserSettings) -> StoreResult<()> {
        self.check_available()?;
        self.tables.write().settings = Some(settings.clone());
        Ok(())
    }
}
