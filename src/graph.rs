//! The build graph: resources, the rules that produce them, and the lookup
//! tables that keep resource identity stable.

use crate::canon::{canon_path, display_path};
use crate::engine::RuleRun;
use crate::fs::MTime;
use crate::hash::HashAlgorithm;
use crate::resource::{FileResource, Resource, ResourceId, ResourceKind, TaskResource};
use anyhow::bail;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub(crate) usize);
impl RuleId {
    fn index(&self) -> usize {
        self.0
    }
}

/// The caller-supplied action that does a rule's actual work.
pub type Recipe = Box<dyn Fn(&RuleRun<'_>) -> anyhow::Result<()> + Send + Sync>;

/// How a rule decides whether it is out of date.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Staleness {
    /// Run when the newest prerequisite is at least as new as the oldest target.
    Timestamp,
    /// Run when the digest of the prerequisites differs from the digest stored
    /// in the (single, file) target.
    Hash(HashAlgorithm),
}

/// A target as accepted at the API boundary.
#[derive(Debug, Clone)]
pub enum Target {
    Path(PathBuf),
    Resource(ResourceId),
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Target::Path(path.into())
    }
}
impl From<String> for Target {
    fn from(path: String) -> Self {
        Target::Path(path.into())
    }
}
impl From<&Path> for Target {
    fn from(path: &Path) -> Self {
        Target::Path(path.to_path_buf())
    }
}
impl From<PathBuf> for Target {
    fn from(path: PathBuf) -> Self {
        Target::Path(path)
    }
}
impl From<&PathBuf> for Target {
    fn from(path: &PathBuf) -> Self {
        Target::Path(path.clone())
    }
}
impl From<ResourceId> for Target {
    fn from(id: ResourceId) -> Self {
        Target::Resource(id)
    }
}

/// A prerequisite as accepted at the API boundary.  A rule stands for all of
/// its targets.
#[derive(Debug, Clone)]
pub enum Prereq {
    Target(Target),
    Rule(RuleId),
}

macro_rules! prereq_from_target {
    ($($t:ty),*) => {
        $(impl From<$t> for Prereq {
            fn from(t: $t) -> Self {
                Prereq::Target(t.into())
            }
        })*
    };
}
prereq_from_target!(&str, String, &Path, PathBuf, &PathBuf, ResourceId, Target);

impl From<RuleId> for Prereq {
    fn from(id: RuleId) -> Self {
        Prereq::Rule(id)
    }
}

pub struct Rule {
    pub(crate) targets: Vec<ResourceId>,
    pub(crate) prerequisites: Vec<ResourceId>,
    pub(crate) recipe: Option<Recipe>,
    pub(crate) run_at_least_once: bool,
    pub(crate) staleness: Staleness,
    /// Set only when the rule completes a run.
    pub(crate) last_finish_time: Mutex<MTime>,
    pub(crate) args: Vec<String>,
    pub(crate) description: Option<String>,
    name: String,
}

impl Rule {
    pub fn targets(&self) -> &[ResourceId] {
        &self.targets
    }
    pub fn prerequisites(&self) -> &[ResourceId] {
        &self.prerequisites
    }
    pub fn has_recipe(&self) -> bool {
        self.recipe.is_some()
    }
    pub fn run_at_least_once(&self) -> bool {
        self.run_at_least_once
    }
    pub fn staleness(&self) -> Staleness {
        self.staleness
    }
    /// Arguments forwarded from the command line.
    pub fn args(&self) -> &[String] {
        &self.args
    }
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
    pub fn last_finish_time(&self) -> MTime {
        *self.last_finish_time.lock().unwrap()
    }
    pub(crate) fn finished(&self, time: std::time::SystemTime) {
        *self.last_finish_time.lock().unwrap() = MTime::Stamp(time);
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("targets", &self.targets)
            .field("prerequisites", &self.prerequisites)
            .field("staleness", &self.staleness)
            .finish()
    }
}

/// Everything a new rule needs, already normalized to resource ids.
pub struct RuleDecl {
    pub targets: Vec<ResourceId>,
    pub prerequisites: Vec<ResourceId>,
    pub recipe: Option<Recipe>,
    pub run_at_least_once: bool,
    pub staleness: Staleness,
    pub description: Option<String>,
}

struct Node {
    kind: ResourceKind,
    /// The rule that produces this resource, if any.
    rule: Option<RuleId>,
}

pub struct Graph {
    base: PathBuf,
    resources: Vec<Node>,
    rules: Vec<Rule>,
    files: FxHashMap<PathBuf, ResourceId>,
    tasks: FxHashMap<String, ResourceId>,
}

impl Graph {
    pub fn new(base: PathBuf) -> Graph {
        Graph {
            base,
            resources: Vec::new(),
            rules: Vec::new(),
            files: FxHashMap::default(),
            tasks: FxHashMap::default(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Changes the directory relative paths resolve against.  Resources that
    /// were already created keep their paths.
    pub fn set_base(&mut self, base: PathBuf) {
        self.base = base;
    }

    fn add_node(&mut self, kind: ResourceKind) -> ResourceId {
        let id = ResourceId(self.resources.len());
        self.resources.push(Node { kind, rule: None });
        id
    }

    /// Get the resource for a path, creating it the first time it's seen.
    pub fn file_id(&mut self, path: impl AsRef<Path>) -> ResourceId {
        let canon = canon_path(&self.base, path);
        if let Some(&id) = self.files.get(&canon) {
            return id;
        }
        let display = display_path(&self.base, &canon);
        let id = self.add_node(ResourceKind::File(FileResource {
            path: canon.clone(),
            display,
        }));
        self.files.insert(canon, id);
        id
    }

    /// Look up a path without creating it.
    pub fn lookup_file(&self, path: impl AsRef<Path>) -> Option<ResourceId> {
        self.files.get(&canon_path(&self.base, path)).copied()
    }

    pub fn add_resource(&mut self, resource: Box<dyn Resource>) -> ResourceId {
        self.add_node(ResourceKind::Custom(resource))
    }

    pub fn add_task(&mut self, name: &str) -> anyhow::Result<ResourceId> {
        if self.tasks.contains_key(name) {
            bail!("a task named {} already exists", name);
        }
        let id = self.add_node(ResourceKind::Task(TaskResource {
            name: name.to_string(),
        }));
        self.tasks.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn task_id(&self, name: &str) -> Option<ResourceId> {
        self.tasks.get(name).copied()
    }

    /// All task names, sorted.
    pub fn task_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a name given on the command line: tasks first, then files
    /// that are already known to the graph.
    pub fn resolve_name(&self, name: &str) -> anyhow::Result<ResourceId> {
        match self.task_id(name).or_else(|| self.lookup_file(name)) {
            Some(id) => Ok(id),
            None => bail!("no task or file found for {}", name),
        }
    }

    pub fn resource(&self, id: ResourceId) -> &ResourceKind {
        &self.resources[id.index()].kind
    }

    pub fn rule_for(&self, id: ResourceId) -> Option<RuleId> {
        self.resources[id.index()].rule
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.index()]
    }

    pub fn rule_mut(&mut self, id: RuleId) -> &mut Rule {
        &mut self.rules[id.index()]
    }

    /// Ids are plain indices, so one from another engine must be caught here.
    pub fn check_resource(&self, id: ResourceId) -> anyhow::Result<()> {
        if id.index() >= self.resources.len() {
            bail!("unknown resource {:?}", id);
        }
        Ok(())
    }

    pub fn check_rule(&self, id: RuleId) -> anyhow::Result<()> {
        if id.index() >= self.rules.len() {
            bail!("unknown rule {:?}", id);
        }
        Ok(())
    }

    pub fn normalize_target(&mut self, target: Target) -> anyhow::Result<ResourceId> {
        match target {
            Target::Path(path) => Ok(self.file_id(path)),
            Target::Resource(id) => {
                self.check_resource(id)?;
                Ok(id)
            }
        }
    }

    /// Flatten prerequisites into resources; a rule expands to its targets.
    pub fn normalize_prereqs(&mut self, prereqs: Vec<Prereq>) -> anyhow::Result<Vec<ResourceId>> {
        let mut ids = Vec::with_capacity(prereqs.len());
        for prereq in prereqs {
            match prereq {
                Prereq::Target(target) => ids.push(self.normalize_target(target)?),
                Prereq::Rule(rule) => {
                    self.check_rule(rule)?;
                    ids.extend_from_slice(&self.rule(rule).targets);
                }
            }
        }
        Ok(ids)
    }

    fn rule_name(&self, targets: &[ResourceId]) -> String {
        let first = self.resource(targets[0]);
        match targets.len() {
            1 => first.to_string(),
            n => format!("{} (+{} more)", first, n - 1),
        }
    }

    /// Register a rule.  Fails without touching the graph if any target is
    /// already claimed by another rule.
    pub fn add_rule(&mut self, decl: RuleDecl) -> anyhow::Result<RuleId> {
        if decl.targets.is_empty() {
            bail!("a rule needs at least one target");
        }
        for (i, &target) in decl.targets.iter().enumerate() {
            if self.rule_for(target).is_some() || decl.targets[..i].contains(&target) {
                bail!("a rule for {} already exists", self.resource(target));
            }
        }
        let id = RuleId(self.rules.len());
        for &target in &decl.targets {
            self.resources[target.index()].rule = Some(id);
        }
        let name = self.rule_name(&decl.targets);
        self.rules.push(Rule {
            targets: decl.targets,
            prerequisites: decl.prerequisites,
            recipe: decl.recipe,
            run_at_least_once: decl.run_at_least_once,
            staleness: decl.staleness,
            last_finish_time: Mutex::new(MTime::Missing),
            args: Vec::new(),
            description: decl.description,
            name,
        });
        Ok(id)
    }
}
