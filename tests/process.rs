//! Recipes that run real child processes.
#![cfg(unix)]

mod support;

use kiln::process::ProcessManager;
use kiln::progress::Logger;
use kiln::signal::{Handler, PosixSignals, Signal, Signals};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use support::*;

#[test]
fn exec_runs_shell_commands() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let (mut engine, lines) = space.engine();
    let out = space.path("out.txt");
    let rule = engine
        .rule([out.as_path()])
        .recipe(|run| {
            let out = run.target_paths()[0].display().to_string();
            run.exec(&format!("echo hello > '{}'", out))
        })
        .register()?;
    engine.make_rule(rule)?;
    assert_eq!(space.read("out.txt")?, "hello\n");
    assert!(lines.all().iter().any(|l| l.starts_with("$ echo hello")));
    Ok(())
}

#[test]
fn failing_command_fails_the_rule() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let (mut engine, _lines) = space.engine();
    let rule = engine.task("fail").recipe(|run| run.exec("exit 3")).register()?;
    let err = engine.make_rule(rule).unwrap_err();
    assert!(err.to_string().contains("exit 3: failed"), "{}", err);
    assert_eq!(engine.processes().live_count(), 0);
    Ok(())
}

#[test]
fn spawn_passes_arguments_without_a_shell() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let (mut engine, lines) = space.engine();
    let dest = space.path("copy of src");
    space.write("src", "content")?;
    let rule = engine
        .rule([dest.as_path()])
        .prereq(space.path("src"))
        .recipe(|run| {
            let dest = run.target_paths()[0];
            let src = dest.with_file_name("src");
            run.spawn("cp", &[src.to_str().unwrap(), dest.to_str().unwrap()])
        })
        .register()?;
    engine.make_rule(rule)?;
    assert_eq!(space.read("copy of src")?, "content");
    assert!(lines.contains("copy of src'"));
    Ok(())
}

#[test]
fn command_echo_is_quiet() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let (mut engine, lines) = space.engine();
    engine.set_verbosity(kiln::Verbosity::Quiet);
    let rule = engine
        .task("t")
        .recipe(|run| run.command(Command::new("true").arg("--ignored")))
        .register()?;
    engine.make_rule(rule)?;
    assert!(lines.all().is_empty());
    Ok(())
}

#[test]
fn missing_program_is_reported() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let (mut engine, _lines) = space.engine();
    let rule = engine
        .task("t")
        .recipe(|run| run.spawn::<&str>("/nonexistent/program", &[]))
        .register()?;
    let err = engine.make_rule(rule).unwrap_err();
    assert!(err.to_string().starts_with("spawn /nonexistent/program"), "{}", err);
    Ok(())
}

/// Real kill(), but the host's own SIGINT disposition is left alone.
#[derive(Clone, Default)]
struct ChildSignals {
    handler: Arc<Mutex<Option<Handler>>>,
    reraised: Arc<Mutex<bool>>,
}

impl ChildSignals {
    fn fire(&self) {
        let handler = self.handler.lock().unwrap();
        (handler.as_ref().expect("handler installed"))();
    }
    fn reraised(&self) -> bool {
        *self.reraised.lock().unwrap()
    }
}

impl Signals for ChildSignals {
    fn install(&self, handler: Handler) -> anyhow::Result<()> {
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }
    fn uninstall(&self) {}
    fn kill(&self, pid: u32, signal: Signal) -> std::io::Result<()> {
        PosixSignals::new().kill(pid, signal)
    }
    fn reraise(&self) {
        *self.reraised.lock().unwrap() = true;
    }
}

fn spawn_tracked(
    script: &'static str,
) -> (Arc<ProcessManager>, ChildSignals, std::thread::JoinHandle<anyhow::Result<()>>) {
    let signals = ChildSignals::default();
    let log = Arc::new(Logger::new(Box::new(Lines::default())));
    let manager = ProcessManager::new(Box::new(signals.clone()), log);
    let thread = std::thread::spawn({
        let manager = manager.clone();
        move || manager.run(Command::new("/bin/sh").arg("-c").arg(script), script)
    });
    let start = Instant::now();
    while manager.live_count() == 0 {
        assert!(start.elapsed() < Duration::from_secs(5), "child never started");
        std::thread::sleep(Duration::from_millis(5));
    }
    // Let the shell get as far as installing its traps.
    std::thread::sleep(Duration::from_millis(200));
    (manager, signals, thread)
}

#[test]
fn first_interrupt_reaches_children() -> anyhow::Result<()> {
    let (manager, signals, thread) = spawn_tracked("exec sleep 5");
    signals.fire();
    let err = thread.join().unwrap().unwrap_err();
    assert!(err.to_string().ends_with("interrupted"), "{}", err);
    assert_eq!(manager.live_count(), 0);
    assert!(signals.reraised());
    Ok(())
}

#[test]
fn second_interrupt_kills_stubborn_children() -> anyhow::Result<()> {
    let (manager, signals, thread) = spawn_tracked("trap '' INT; exec sleep 5");
    signals.fire();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(manager.live_count(), 1);
    assert!(!signals.reraised());

    signals.fire();
    let err = thread.join().unwrap().unwrap_err();
    assert!(err.to_string().ends_with("killed by signal 9"), "{}", err);
    assert!(signals.reraised());
    Ok(())
}
