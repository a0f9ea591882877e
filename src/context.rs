//! Per-build memoization of rule outcomes.

use crate::graph::RuleId;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A failure shared by every observer of one rule within one execution
/// context.  Display, Debug and the source chain are those of the original
/// error.
#[derive(Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl SharedError {
    fn new(err: anyhow::Error) -> Self {
        // Don't nest: a prerequisite's failure passing through a dependent is
        // still the same failure.
        match err.downcast::<SharedError>() {
            Ok(shared) => shared,
            Err(err) => SharedError(Arc::new(err)),
        }
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Whether two errors are the same recorded failure.
    pub fn same_as(&self, other: &SharedError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Display for SharedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&*self.0, f)
    }
}

impl std::fmt::Debug for SharedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&*self.0, f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

enum Outcome {
    /// The rule is somewhere up the current call stack.
    Running,
    Done(Result<(), SharedError>),
}

/// Memoization scope for one top-level make request.  Each rule runs at most
/// once per context; later requests observe the recorded outcome, including
/// failures, which are never retried.
#[derive(Default)]
pub struct ExecutionContext {
    outcomes: FxHashMap<RuleId, Outcome>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `rule` is currently running in this context.
    pub fn is_running(&self, rule: RuleId) -> bool {
        matches!(self.outcomes.get(&rule), Some(Outcome::Running))
    }

    /// Whether `rule` has a recorded outcome in this context.
    pub fn is_done(&self, rule: RuleId) -> bool {
        matches!(self.outcomes.get(&rule), Some(Outcome::Done(_)))
    }

    /// Runs `f` for `rule` unless this context already has an outcome for it.
    pub fn make<F>(&mut self, rule: RuleId, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut ExecutionContext) -> anyhow::Result<()>,
    {
        match self.outcomes.get(&rule) {
            Some(Outcome::Done(Ok(()))) => return Ok(()),
            Some(Outcome::Done(Err(err))) => return Err(err.clone().into()),
            Some(Outcome::Running) => anyhow::bail!("dependency cycle through {:?}", rule),
            None => {}
        }
        self.outcomes.insert(rule, Outcome::Running);
        let result = f(self).map_err(SharedError::new);
        self.outcomes.insert(rule, Outcome::Done(result.clone()));
        result.map_err(anyhow::Error::from)
    }
}
