//! A programmatic make.  Build scripts register rules that produce target
//! resources (files, named tasks, or their own resource types) from
//! prerequisites, then ask the engine to make targets; each rule's recipe
//! runs only when its targets are stale, and at most once per build.

pub mod canon;
mod cli;
pub mod context;
mod engine;
pub mod fs;
mod graph;
pub mod hash;
pub mod process;
pub mod progress;
pub mod resource;
pub mod signal;
mod terminal;
mod work;

pub use context::{ExecutionContext, SharedError};
pub use engine::{Engine, RuleBuilder, RuleRun};
pub use fs::{FileSystem, MTime, RealFileSystem};
pub use graph::{Prereq, Recipe, Rule, RuleId, Staleness, Target};
pub use hash::{HashAlgorithm, Hasher};
pub use progress::{Console, Verbosity};
pub use resource::{HashResource, Resource, ResourceId};
