//! Command line driver for build scripts.
//!
//! A build script registers its rules and then hands its arguments to
//! `Engine::run_cli`.  Arguments name targets to make; flags before the first
//! target adjust verbosity; anything after a target that isn't itself a target
//! is forwarded to that target's rule, and a bare `--` forwards everything up
//! to the next `--` verbatim.

use crate::context::ExecutionContext;
use crate::engine::Engine;
use crate::progress::Verbosity;
use crate::resource::ResourceId;
use anyhow::bail;

impl Engine {
    /// Run the command line of the current process and exit: status 0 on
    /// success, 1 after logging the error on failure.
    pub fn run_cli(&mut self) -> ! {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let code = match self.cli(&args) {
            Ok(()) => 0,
            Err(err) => {
                self.log(Verbosity::Default, &format!("error: {:?}", err));
                1
            }
        };
        std::process::exit(code)
    }

    /// Handle command line arguments (without the program name): forward
    /// rule arguments, then make every named target in one shared context.
    pub fn cli<S: AsRef<str>>(&mut self, args: &[S]) -> anyhow::Result<()> {
        let targets = self.parse_args(args)?;
        if targets.is_empty() {
            self.print_usage();
            return Ok(());
        }
        let mut ctx = ExecutionContext::new();
        for target in targets {
            self.make_resource(target, &mut ctx)?;
        }
        Ok(())
    }

    /// Resolve targets and forward rule arguments, without making anything.
    pub fn parse_args<S: AsRef<str>>(&mut self, args: &[S]) -> anyhow::Result<Vec<ResourceId>> {
        let mut targets = Vec::new();
        let mut last_target: Option<ResourceId> = None;
        let mut forwarding = false;
        for arg in args {
            let arg = arg.as_ref();
            if forwarding {
                if arg == "--" {
                    forwarding = false;
                } else if let Some(target) = last_target {
                    let rule = self.lookup_rule(target)?;
                    self.args_mut(rule).push(unescape_dashes(arg).to_string());
                }
            } else if arg.starts_with('-') {
                match last_target {
                    Some(target) => {
                        let rule = self.lookup_rule(target)?;
                        if arg == "--" {
                            self.args_mut(rule).clear();
                            forwarding = true;
                        } else {
                            self.args_mut(rule).push(arg.to_string());
                        }
                    }
                    None => match arg {
                        "-q" | "--quiet" => self.set_verbosity(Verbosity::Quiet),
                        "-v" | "--verbose" => self.set_verbosity(Verbosity::High),
                        _ => bail!("unrecognized option: {}", arg),
                    },
                }
            } else {
                match self.graph.resolve_name(arg) {
                    Ok(target) => {
                        targets.push(target);
                        last_target = Some(target);
                    }
                    Err(err) => match last_target {
                        Some(target) => {
                            let rule = self.lookup_rule(target)?;
                            self.args_mut(rule).push(arg.to_string());
                        }
                        None => return Err(err),
                    },
                }
            }
        }
        Ok(targets)
    }

    /// The usage text, listing tasks with their descriptions.
    pub fn usage(&self) -> String {
        let version = env!("CARGO_PKG_VERSION");
        let tasks = self.task_names();
        let width = tasks.iter().map(|t| t.len()).max().unwrap_or(0).max(16) + 2;
        let task_lines = if tasks.is_empty() {
            "(No tasks defined)".to_string()
        } else {
            tasks
                .iter()
                .map(|&name| {
                    let description = self
                        .lookup_task(name)
                        .ok()
                        .and_then(|rule| self.get_rule(rule).description())
                        .unwrap_or("");
                    format!("{:width$}{}", name, description, width = width)
                        .trim_end()
                        .to_string()
                })
                .collect::<Vec<_>>()
                .join("\n  ")
        };
        format!(
            "kiln CLI, version {}

Usage:
  ./<script> [options...] [tasks...]

Options:
  -q, --quiet       suppress output
  -v, --verbose     verbose output

Tasks:
  {}
",
            version, task_lines
        )
    }

    pub fn print_usage(&self) {
        self.log.print(&self.usage());
    }
}

/// Inside `--` forwarding, `----` stands for a literal `--` (and so on), so
/// a forwarded argument list can itself contain `--`.
fn unescape_dashes(arg: &str) -> &str {
    if arg.len() > 2 && arg.bytes().all(|b| b == b'-') {
        &arg[2..]
    } else {
        arg
    }
}
