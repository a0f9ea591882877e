//! Lifecycle of child processes spawned by recipes.
//!
//! Every running child is tracked in a live set.  The first interrupt of the
//! host is forwarded to the children as SIGINT so they can clean up, and the
//! host waits for them; a second interrupt escalates to SIGKILL.  Once an
//! interrupted host has no children left, it removes its handler and
//! interrupts itself so it exits the way an interrupted process should.

use crate::progress::{Logger, Verbosity};
use crate::signal::{Signal, Signals};
use anyhow::bail;
use rustc_hash::FxHashSet;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    live: FxHashSet<u32>,
    /// Interrupts received so far.
    kill_count: usize,
    /// Whether the interrupt handler is in place.
    installed: bool,
    /// Set once we've given up and re-raised the interrupt.
    died: bool,
}

pub struct ProcessManager {
    signals: Box<dyn Signals>,
    log: Arc<Logger>,
    state: Mutex<State>,
}

impl ProcessManager {
    pub fn new(signals: Box<dyn Signals>, log: Arc<Logger>) -> Arc<Self> {
        Arc::new(ProcessManager {
            signals,
            log,
            state: Mutex::new(State::default()),
        })
    }

    /// Number of tracked children still running.
    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live.len()
    }

    /// Number of interrupts seen so far.
    pub fn kill_count(&self) -> usize {
        self.state.lock().unwrap().kill_count
    }

    /// Start tracking a child.  The child stays in the live set until the
    /// returned guard is dropped, which should happen once it has exited.
    pub fn track(self: &Arc<Self>, pid: u32) -> anyhow::Result<Tracked> {
        let install = {
            let mut state = self.state.lock().unwrap();
            state.live.insert(pid);
            let install = !state.installed;
            state.installed = true;
            install
        };
        if install {
            let weak = Arc::downgrade(self);
            let installed = self.signals.install(Box::new(move || {
                if let Some(manager) = weak.upgrade() {
                    manager.interrupt();
                }
            }));
            if let Err(err) = installed {
                let mut state = self.state.lock().unwrap();
                state.installed = false;
                state.live.remove(&pid);
                return Err(err);
            }
        }
        Ok(Tracked {
            manager: self.clone(),
            pid,
        })
    }

    /// React to one interrupt of the host process.
    pub fn interrupt(&self) {
        let (pids, signal, empty) = {
            let mut state = self.state.lock().unwrap();
            if state.died {
                return;
            }
            state.kill_count += 1;
            let signal = if state.kill_count > 1 {
                Signal::Kill
            } else {
                Signal::Interrupt
            };
            let pids: Vec<u32> = state.live.iter().copied().collect();
            (pids, signal, state.live.is_empty())
        };
        match signal {
            Signal::Interrupt => self.log.log(Verbosity::Default, "cleaning up, please wait..."),
            Signal::Kill => self.log.log(
                Verbosity::Quiet,
                "got second SIGINT, killing spawned processes with SIGKILL",
            ),
        }
        for pid in pids {
            if let Err(err) = self.signals.kill(pid, signal) {
                // The child most likely exited on its own already.
                self.log
                    .log(Verbosity::High, &format!("signal process {}: {}", pid, err));
            }
        }
        if empty {
            // Nothing to wait for.
            self.die();
        }
    }

    fn release(&self, pid: u32) {
        let die = {
            let mut state = self.state.lock().unwrap();
            state.live.remove(&pid);
            state.live.is_empty() && state.kill_count > 0
        };
        if die {
            self.die();
        }
    }

    fn die(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.died {
                return;
            }
            state.died = true;
            state.installed = false;
        }
        self.signals.uninstall();
        self.signals.reraise();
    }

    /// Run a prepared command to completion while tracking it.  `display` is
    /// the command line echoed to the console.  Child output is forwarded
    /// unless the log is quiet.
    pub fn run(self: &Arc<Self>, cmd: &mut Command, display: &str) -> anyhow::Result<()> {
        self.log.command(Verbosity::Default, display);
        if !self.log.enabled(Verbosity::Default) {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => bail!("spawn {}: {}", display, err),
        };
        let tracked = match self.track(child.id()) {
            Ok(tracked) => tracked,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };
        let status = child.wait();
        drop(tracked);
        let status = match status {
            Ok(status) => status,
            Err(err) => bail!("wait {}: {}", display, err),
        };
        check_status(display, status)
    }
}

#[cfg(unix)]
fn check_status(display: &str, status: ExitStatus) -> anyhow::Result<()> {
    use std::os::unix::process::ExitStatusExt;
    if status.success() {
        return Ok(());
    }
    match status.signal() {
        Some(libc::SIGINT) => bail!("{}: interrupted", display),
        Some(sig) => bail!("{}: killed by signal {}", display, sig),
        None => bail!("{}: failed with {}", display, status),
    }
}

#[cfg(not(unix))]
fn check_status(display: &str, status: ExitStatus) -> anyhow::Result<()> {
    if status.success() {
        return Ok(());
    }
    bail!("{}: failed with {}", display, status)
}

/// A child in the live set.  Dropping it removes the child from the set.
pub struct Tracked {
    manager: Arc<ProcessManager>,
    pid: u32,
}

impl Tracked {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.manager.release(self.pid);
    }
}

/// Format a command line for display, quoting arguments the shell would
/// otherwise mangle.
pub fn format_command<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut out = program.to_string();
    for arg in args {
        let arg = arg.as_ref();
        out.push(' ');
        let plain = !arg.is_empty()
            && arg
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"-_=./".contains(&b));
        if plain {
            out.push_str(arg);
        } else {
            out.push('\'');
            out.push_str(&arg.replace('\'', "'\\''"));
            out.push('\'');
        }
    }
    out
}
