//! Build progress messages, for the purpose of display to the user.

use crate::terminal;
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};

/// How much to print.  Ordered: a message logged at level L shows when the
/// current verbosity is at least L.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum Verbosity {
    Quiet = 0,
    Default = 1,
    High = 2,
}

impl Verbosity {
    fn from_u8(v: u8) -> Verbosity {
        match v {
            0 => Verbosity::Quiet,
            1 => Verbosity::Default,
            _ => Verbosity::High,
        }
    }
}

/// Where messages end up.
pub trait Console: Send + Sync {
    /// A status line, e.g. "Making out/foo.o".
    fn log(&self, msg: &str);

    /// Echo of a command line about to run.
    fn command(&self, cmdline: &str);

    /// Raw text, e.g. usage.
    fn print(&self, text: &str);
}

/// Console on the process's stderr, styled when stderr is a terminal.
pub struct StderrConsole {
    fancy: bool,
}

impl StderrConsole {
    pub fn new() -> Self {
        StderrConsole {
            fancy: terminal::use_fancy(),
        }
    }
}

impl Default for StderrConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for StderrConsole {
    fn log(&self, msg: &str) {
        if self.fancy {
            eprintln!("\x1b[1m[kiln]\x1b[0m {}", msg);
        } else {
            eprintln!("[kiln] {}", msg);
        }
    }

    fn command(&self, cmdline: &str) {
        if self.fancy {
            eprintln!("\x1b[90m$ {}\x1b[0m", cmdline);
        } else {
            eprintln!("$ {}", cmdline);
        }
    }

    fn print(&self, text: &str) {
        // Nothing useful to do if stderr is gone.
        let _ = std::io::stderr().write_all(text.as_bytes());
    }
}

/// A console plus the verbosity gate in front of it.  Shared between the
/// engine and the process manager.
pub struct Logger {
    verbosity: AtomicU8,
    console: Box<dyn Console>,
}

impl Logger {
    pub fn new(console: Box<dyn Console>) -> Self {
        Logger {
            verbosity: AtomicU8::new(Verbosity::Default as u8),
            console,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_u8(self.verbosity.load(Ordering::Relaxed))
    }

    pub fn set_verbosity(&self, verbosity: Verbosity) {
        self.verbosity.store(verbosity as u8, Ordering::Relaxed);
    }

    pub fn enabled(&self, level: Verbosity) -> bool {
        self.verbosity() >= level
    }

    pub fn log(&self, level: Verbosity, msg: &str) {
        if self.enabled(level) {
            self.console.log(msg);
        }
    }

    pub fn command(&self, level: Verbosity, cmdline: &str) {
        if self.enabled(level) {
            self.console.command(cmdline);
        }
    }

    /// Unconditional raw output.
    pub fn print(&self, text: &str) {
        self.console.print(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Lines(Arc<Mutex<Vec<String>>>);
    impl Console for Lines {
        fn log(&self, msg: &str) {
            self.0.lock().unwrap().push(msg.to_string());
        }
        fn command(&self, cmdline: &str) {
            self.0.lock().unwrap().push(format!("$ {}", cmdline));
        }
        fn print(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    #[test]
    fn gates_on_verbosity() {
        let lines = Lines::default();
        let logger = Logger::new(Box::new(lines.clone()));
        logger.log(Verbosity::Default, "shown");
        logger.log(Verbosity::High, "hidden");
        logger.set_verbosity(Verbosity::Quiet);
        logger.log(Verbosity::Default, "hidden");
        logger.log(Verbosity::Quiet, "always");
        logger.command(Verbosity::Default, "hidden");
        assert_eq!(*lines.0.lock().unwrap(), vec!["shown", "always"]);
    }

    #[test]
    fn ordering() {
        assert!(Verbosity::Quiet < Verbosity::Default);
        assert!(Verbosity::Default < Verbosity::High);
        let logger = Logger::new(Box::new(Lines::default()));
        logger.set_verbosity(Verbosity::High);
        assert_eq!(logger.verbosity(), Verbosity::High);
    }
}
