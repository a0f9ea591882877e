//! The make algorithm: recursively bring a resource up to date by running
//! the rules that produce it and its prerequisites.
//!
//! Prerequisites of a rule are made one after another, in declaration order.
//! Hash rules depend on that order for their digest, and it keeps failure
//! behavior simple: the first failing prerequisite fails the rule.  Each rule
//! runs at most once per ExecutionContext.

use crate::context::ExecutionContext;
use crate::engine::{Engine, RuleRun};
use crate::fs::MTime;
use crate::graph::{RuleId, Staleness, Target};
use crate::hash::{HashAlgorithm, Hasher};
use crate::progress::Verbosity;
use crate::resource::{ResourceId, ResourceKind};
use anyhow::{bail, Context};
use rayon::prelude::*;
use std::time::SystemTime;

impl Engine {
    /// Make a target in a fresh execution context.
    pub fn make(&self, target: impl Into<Target>) -> anyhow::Result<()> {
        self.make_in(target, &mut ExecutionContext::new())
    }

    /// Make a target, sharing memoization with earlier calls using `ctx`.
    /// Path targets name a task or an already-known file.
    pub fn make_in(&self, target: impl Into<Target>, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        let id = match target.into() {
            Target::Path(path) => match path.to_str() {
                Some(name) => self.graph.resolve_name(name)?,
                None => match self.graph.lookup_file(&path) {
                    Some(id) => id,
                    None => bail!("no task or file found for {}", path.display()),
                },
            },
            Target::Resource(id) => {
                self.graph.check_resource(id)?;
                id
            }
        };
        self.make_resource(id, ctx)?;
        Ok(())
    }

    /// Make a rule in a fresh execution context.
    pub fn make_rule(&self, rule: RuleId) -> anyhow::Result<()> {
        self.make_rule_in(rule, &mut ExecutionContext::new())
    }

    pub fn make_rule_in(&self, rule: RuleId, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        self.graph.check_rule(rule)?;
        if ctx.is_running(rule) {
            bail!("dependency cycle detected at {}", self.graph.rule(rule));
        }
        ctx.make(rule, |ctx| self.run_rule(rule, ctx))
    }

    /// Bring a resource up to date and report its resulting last modified
    /// time.  A resource without a rule must already exist.
    pub(crate) fn make_resource(&self, id: ResourceId, ctx: &mut ExecutionContext) -> anyhow::Result<MTime> {
        match self.graph.rule_for(id) {
            Some(rule) => {
                self.make_rule_in(rule, ctx)?;
                self.last_modified(id)
            }
            None => match self.last_modified(id)? {
                MTime::Missing => bail!("no rule found to make {}", self.graph.resource(id)),
                stamp => Ok(stamp),
            },
        }
    }

    /// The current last modified time of a resource.
    pub fn last_modified(&self, id: ResourceId) -> anyhow::Result<MTime> {
        match self.graph.resource(id) {
            ResourceKind::File(file) => self
                .fs
                .stat(file.path())
                .with_context(|| format!("stat {}", file.display)),
            ResourceKind::Task(task) => match self.graph.rule_for(id) {
                Some(rule) => Ok(self.graph.rule(rule).last_finish_time()),
                None => bail!("missing rule for task {}", task.name),
            },
            ResourceKind::Custom(resource) => resource.last_modified(),
        }
    }

    fn update_hash(&self, id: ResourceId, hasher: &mut Hasher) -> anyhow::Result<()> {
        match self.graph.resource(id) {
            ResourceKind::File(file) => {
                let mut reader = match self.fs.open(file.path()) {
                    Ok(reader) => reader,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                    Err(err) => return Err(err).with_context(|| format!("read {}", file.display)),
                };
                hasher
                    .update_reader(&mut *reader)
                    .with_context(|| format!("read {}", file.display))
            }
            ResourceKind::Custom(resource) => match resource.as_hash_resource() {
                Some(hashable) => hashable.update_hash(hasher),
                None => bail!("prerequisite lacks the hash capability: {}", resource),
            },
            ResourceKind::Task(task) => {
                bail!("prerequisite lacks the hash capability: {}", task.name)
            }
        }
    }

    fn run_rule(&self, id: RuleId, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        match self.graph.rule(id).staleness() {
            Staleness::Timestamp => self.run_timestamp_rule(id, ctx),
            Staleness::Hash(algorithm) => self.run_hash_rule(id, algorithm, ctx),
        }
    }

    fn run_recipe(&self, id: RuleId) -> anyhow::Result<()> {
        let rule = self.graph.rule(id);
        if let Some(recipe) = &rule.recipe {
            recipe(&RuleRun {
                engine: self,
                id,
                rule,
            })?;
        }
        Ok(())
    }

    fn run_timestamp_rule(&self, id: RuleId, ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        let rule = self.graph.rule(id);

        // Targets have no ordering between them, so stat them all at once.
        let target_times = rule
            .targets()
            .par_iter()
            .map(|&target| self.last_modified(target))
            .collect::<anyhow::Result<Vec<MTime>>>()?;

        // A task without a recipe only aggregates its prerequisites; announce
        // it before they start.
        if let [only] = rule.targets() {
            if matches!(self.graph.resource(*only), ResourceKind::Task(_)) && !rule.has_recipe() {
                self.log(Verbosity::Default, &format!("Making {}", rule));
            }
        }

        let mut prereq_times = Vec::with_capacity(rule.prerequisites().len());
        for &prereq in rule.prerequisites() {
            prereq_times.push(self.make_resource(prereq, ctx)?);
        }

        if !rule.run_at_least_once() {
            let oldest_target = target_times
                .iter()
                .map(|t| t.stamp())
                .collect::<Option<Vec<SystemTime>>>()
                .and_then(|stamps| stamps.into_iter().min());
            if let Some(oldest_target) = oldest_target {
                let newest_prereq = prereq_times.iter().filter_map(|t| t.stamp()).max();
                // Targets must be strictly newer; a tie means stale.
                let fresh = match newest_prereq {
                    None => true,
                    Some(newest) => oldest_target > newest,
                };
                if rule.prerequisites().is_empty() || fresh {
                    self.log(Verbosity::Default, &format!("Nothing to be done for {}", rule));
                    return Ok(());
                }
            }
        }

        if rule.has_recipe() {
            self.log(Verbosity::Default, &format!("Making {}", rule));
            self.run_recipe(id)?;
        }
        rule.finished(SystemTime::now());
        Ok(())
    }

    fn run_hash_rule(
        &self,
        id: RuleId,
        algorithm: HashAlgorithm,
        ctx: &mut ExecutionContext,
    ) -> anyhow::Result<()> {
        let rule = self.graph.rule(id);
        let file = match self.graph.resource(rule.targets()[0]) {
            ResourceKind::File(file) => file,
            other => bail!("hash rule target {} must be a file", other),
        };

        let mut hasher = algorithm.hasher();
        for &prereq in rule.prerequisites() {
            self.make_resource(prereq, ctx)?;
            self.update_hash(prereq, &mut hasher)?;
        }
        let digest = hasher.finish();

        let last_digest = match self.fs.read_to_string(file.path()) {
            Ok(content) => Some(content.trim().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err).with_context(|| format!("read {}", file.display)),
        };
        if !rule.run_at_least_once() && last_digest.as_deref() == Some(digest.as_str()) {
            self.log(
                Verbosity::Default,
                &format!("Nothing to be done for {} (hash: {})", rule, digest),
            );
            return Ok(());
        }

        if rule.has_recipe() {
            self.log(
                Verbosity::Default,
                &format!("Making {} (hash: {})", rule, digest),
            );
            self.run_recipe(id)?;
        }
        self.fs
            .write(file.path(), digest.as_bytes())
            .with_context(|| format!("write {}", file.display))?;
        rule.finished(SystemTime::now());
        Ok(())
    }
}
