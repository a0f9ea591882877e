//! The public face of the crate: an engine holding the rule graph, with
//! registration calls for build scripts and the handle recipes run with.

use crate::canon::canon_path;
use crate::fs::{FileSystem, RealFileSystem};
use crate::graph::{Graph, Prereq, Recipe, Rule, RuleId, RuleDecl, Staleness, Target};
use crate::hash::HashAlgorithm;
use crate::process::{format_command, ProcessManager};
use crate::progress::{Console, Logger, StderrConsole, Verbosity};
use crate::resource::{Resource, ResourceId, ResourceKind};
use crate::signal::{self, Signals};
use anyhow::bail;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

pub struct Engine {
    pub(crate) graph: Graph,
    pub(crate) fs: Box<dyn FileSystem>,
    pub(crate) log: Arc<Logger>,
    pub(crate) processes: Arc<ProcessManager>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine on the real file system, logging to stderr, resolving
    /// relative paths against the current directory.
    pub fn new() -> Self {
        Self::with_parts(
            Box::new(RealFileSystem::new()),
            Box::new(StderrConsole::new()),
            signal::platform_signals(),
        )
    }

    pub fn with_parts(
        fs: Box<dyn FileSystem>,
        console: Box<dyn Console>,
        signals: Box<dyn Signals>,
    ) -> Self {
        let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let log = Arc::new(Logger::new(console));
        let processes = ProcessManager::new(signals, log.clone());
        Engine {
            graph: Graph::new(base),
            fs,
            log,
            processes,
        }
    }

    pub fn base_dir(&self) -> &Path {
        self.graph.base()
    }

    /// Resolve relative paths given from now on against `dir`.
    pub fn set_base_dir(&mut self, dir: impl AsRef<Path>) {
        let dir = canon_path(self.graph.base(), dir);
        self.graph.set_base(dir);
    }

    pub fn verbosity(&self) -> Verbosity {
        self.log.verbosity()
    }

    pub fn set_verbosity(&self, verbosity: Verbosity) {
        self.log.set_verbosity(verbosity);
    }

    pub fn log(&self, level: Verbosity, msg: &str) {
        self.log.log(level, msg);
    }

    pub fn processes(&self) -> &Arc<ProcessManager> {
        &self.processes
    }

    /// The resource for a file path; the same path always gives the same id.
    pub fn file(&mut self, path: impl AsRef<Path>) -> ResourceId {
        self.graph.file_id(path)
    }

    /// Register a caller-supplied resource.  Every call makes a new resource.
    pub fn resource(&mut self, resource: impl Resource + 'static) -> ResourceId {
        self.graph.add_resource(Box::new(resource))
    }

    /// Human-readable name of a resource.
    pub fn resource_name(&self, id: ResourceId) -> String {
        self.graph.resource(id).to_string()
    }

    /// The path of a file resource.
    pub fn path(&self, id: ResourceId) -> Option<&Path> {
        match self.graph.resource(id) {
            ResourceKind::File(file) => Some(file.path()),
            _ => None,
        }
    }

    /// Start declaring a timestamp rule producing `targets`.
    pub fn rule<T: Into<Target>>(&mut self, targets: impl IntoIterator<Item = T>) -> RuleBuilder<'_> {
        let targets = targets.into_iter().map(Into::into).collect();
        RuleBuilder::new(self, Kind::Timestamp, targets)
    }

    /// Start declaring a hash rule: `target` is a file holding the hex digest
    /// of the prerequisites' content under `algorithm`.
    pub fn hash_rule(&mut self, algorithm: &str, target: impl Into<Target>) -> RuleBuilder<'_> {
        RuleBuilder::new(self, Kind::Hash(algorithm.to_string()), vec![target.into()])
    }

    /// Start declaring a task: a rule for a named virtual resource.
    pub fn task(&mut self, name: &str) -> RuleBuilder<'_> {
        RuleBuilder::new(self, Kind::Task(name.to_string()), Vec::new())
    }

    fn lookup_target(&self, target: Target) -> anyhow::Result<Option<ResourceId>> {
        Ok(match target {
            Target::Path(path) => self.graph.lookup_file(path),
            Target::Resource(id) => {
                self.graph.check_resource(id)?;
                Some(id)
            }
        })
    }

    /// The rule already registered for `target`.
    pub fn lookup_rule(&self, target: impl Into<Target>) -> anyhow::Result<RuleId> {
        let target = target.into();
        let found = self
            .lookup_target(target.clone())?
            .and_then(|id| self.graph.rule_for(id));
        match found {
            Some(rule) => Ok(rule),
            None => bail!("no rule found for {}", self.describe_target(&target)),
        }
    }

    /// Like `lookup_rule`, but the rule must be a hash rule.
    pub fn lookup_hash_rule(&self, target: impl Into<Target>) -> anyhow::Result<RuleId> {
        let rule = self.lookup_rule(target)?;
        match self.graph.rule(rule).staleness() {
            Staleness::Hash(_) => Ok(rule),
            Staleness::Timestamp => bail!("rule for {} is not a hash rule", self.graph.rule(rule)),
        }
    }

    /// The rule of the task called `name`.
    pub fn lookup_task(&self, name: &str) -> anyhow::Result<RuleId> {
        match self.graph.task_id(name).and_then(|id| self.graph.rule_for(id)) {
            Some(rule) => Ok(rule),
            None => bail!("no task named {} exists", name),
        }
    }

    fn describe_target(&self, target: &Target) -> String {
        match target {
            Target::Path(path) => path.display().to_string(),
            Target::Resource(id) => self.resource_name(*id),
        }
    }

    pub fn get_rule(&self, id: RuleId) -> &Rule {
        self.graph.rule(id)
    }

    pub fn set_description(&mut self, id: RuleId, description: impl Into<String>) {
        self.graph.rule_mut(id).description = Some(description.into());
    }

    /// The argument list forwarded to a rule, e.g. from the command line.
    pub fn args_mut(&mut self, id: RuleId) -> &mut Vec<String> {
        &mut self.graph.rule_mut(id).args
    }

    /// Names of all registered tasks, sorted.
    pub fn task_names(&self) -> Vec<&str> {
        self.graph.task_names()
    }
}

enum Kind {
    Timestamp,
    Hash(String),
    Task(String),
}

/// Collects a rule declaration; nothing is registered until `register`.
#[must_use = "a rule is only registered by calling register()"]
pub struct RuleBuilder<'e> {
    engine: &'e mut Engine,
    kind: Kind,
    targets: Vec<Target>,
    prereqs: Vec<Prereq>,
    recipe: Option<Recipe>,
    run_at_least_once: bool,
    description: Option<String>,
}

impl<'e> RuleBuilder<'e> {
    fn new(engine: &'e mut Engine, kind: Kind, targets: Vec<Target>) -> Self {
        RuleBuilder {
            engine,
            kind,
            targets,
            prereqs: Vec::new(),
            recipe: None,
            run_at_least_once: false,
            description: None,
        }
    }

    pub fn prereq(mut self, prereq: impl Into<Prereq>) -> Self {
        self.prereqs.push(prereq.into());
        self
    }

    pub fn prereqs<P: Into<Prereq>>(mut self, prereqs: impl IntoIterator<Item = P>) -> Self {
        self.prereqs.extend(prereqs.into_iter().map(Into::into));
        self
    }

    pub fn recipe<F>(mut self, recipe: F) -> Self
    where
        F: Fn(&RuleRun<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.recipe = Some(Box::new(recipe));
        self
    }

    /// Run the recipe even when the targets look up to date.
    pub fn run_at_least_once(mut self) -> Self {
        self.run_at_least_once = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn register(self) -> anyhow::Result<RuleId> {
        let RuleBuilder {
            engine,
            kind,
            targets,
            prereqs,
            recipe,
            run_at_least_once,
            description,
        } = self;
        let graph = &mut engine.graph;
        let prerequisites = graph.normalize_prereqs(prereqs)?;
        let (targets, staleness) = match kind {
            Kind::Timestamp => {
                let targets = targets
                    .into_iter()
                    .map(|t| graph.normalize_target(t))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                (targets, Staleness::Timestamp)
            }
            Kind::Hash(algorithm) => {
                let algorithm: HashAlgorithm = algorithm.parse()?;
                let [target] = <[Target; 1]>::try_from(targets)
                    .map_err(|_| anyhow::anyhow!("a hash rule needs exactly one target"))?;
                let target = graph.normalize_target(target)?;
                if !matches!(graph.resource(target), ResourceKind::File(_)) {
                    bail!("hash rule target {} must be a file", graph.resource(target));
                }
                for &prereq in &prerequisites {
                    if !graph.resource(prereq).is_hashable() {
                        bail!("prerequisite lacks the hash capability: {}", graph.resource(prereq));
                    }
                }
                (vec![target], Staleness::Hash(algorithm))
            }
            Kind::Task(name) => (vec![graph.add_task(&name)?], Staleness::Timestamp),
        };
        graph.add_rule(RuleDecl {
            targets,
            prerequisites,
            recipe,
            run_at_least_once,
            staleness,
            description,
        })
    }
}

/// What a recipe gets to work with while its rule runs.
pub struct RuleRun<'a> {
    pub(crate) engine: &'a Engine,
    pub(crate) id: RuleId,
    pub(crate) rule: &'a Rule,
}

impl<'a> RuleRun<'a> {
    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn rule(&self) -> &'a Rule {
        self.rule
    }

    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    /// Arguments forwarded from the command line.
    pub fn args(&self) -> &'a [String] {
        self.rule.args()
    }

    /// Paths of the rule's file targets.
    pub fn target_paths(&self) -> Vec<&'a Path> {
        self.rule
            .targets()
            .iter()
            .filter_map(|&id| self.engine.path(id))
            .collect()
    }

    pub fn log(&self, msg: &str) {
        self.engine.log(Verbosity::Default, msg);
    }

    /// Run a shell command line.
    pub fn exec(&self, cmdline: &str) -> anyhow::Result<()> {
        let mut cmd = shell_command(cmdline);
        self.engine.processes.run(&mut cmd, cmdline)
    }

    /// Run a program with arguments, without a shell.
    pub fn spawn<S: AsRef<str>>(&self, program: &str, args: &[S]) -> anyhow::Result<()> {
        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|a| a.as_ref()));
        self.engine.processes.run(&mut cmd, &format_command(program, args))
    }

    /// Run an already-configured command.
    pub fn command(&self, cmd: &mut Command) -> anyhow::Result<()> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let display = format_command(&program, &args);
        self.engine.processes.run(cmd, &display)
    }
}

#[cfg(unix)]
fn shell_command(cmdline: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(cmdline);
    cmd
}

#[cfg(windows)]
fn shell_command(cmdline: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(cmdline);
    cmd
}
