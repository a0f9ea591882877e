//! Interrupt signal plumbing.
//!
//! The process manager only talks to the `Signals` trait, so its escalation
//! logic can be driven by a fake in tests.  The real implementation catches
//! SIGINT with a handler that just pokes a pipe; a watcher thread reads the
//! pipe and runs every installed callback outside of signal context.  The
//! disposition is process-wide, so all `PosixSignals` share one dispatcher.

/// Signals the process manager sends to children.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Signal {
    /// Polite request to stop (SIGINT).
    Interrupt,
    /// Forced termination (SIGKILL).
    Kill,
}

pub type Handler = Box<dyn Fn() + Send + Sync>;

pub trait Signals: Send + Sync {
    /// Route interrupts of the host process to `handler`.
    fn install(&self, handler: Handler) -> anyhow::Result<()>;
    /// Stop routing interrupts to this handler.  Once no handler is left the
    /// default disposition applies again.
    fn uninstall(&self);
    /// Send `signal` to the child process `pid`.
    fn kill(&self, pid: u32, signal: Signal) -> std::io::Result<()>;
    /// Interrupt the host process itself.  Called after `uninstall`, so with
    /// the default disposition this terminates the host.  Implementations
    /// may hold off while other owners still handle interrupts.
    fn reraise(&self);
}

#[cfg(unix)]
mod posix {
    use super::{Handler, Signal, Signals};
    use std::io::Read;
    use std::os::fd::FromRawFd;
    use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, OnceLock};

    /// Write end of the wake pipe, or -1 before the first install.
    static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

    extern "C" fn sigint_handler(_sig: libc::c_int) {
        let fd = WAKE_FD.load(Ordering::SeqCst);
        if fd >= 0 {
            let byte = 1u8;
            // Safety: write() is async-signal-safe.  A full pipe just drops
            // the wakeup, which only matters after many unread interrupts.
            unsafe {
                libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
            }
        }
    }

    fn sigint_action(handler: libc::sighandler_t) -> std::io::Result<()> {
        // Safety: registering a signal handler is libc unsafe code.
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = handler;
            sa.sa_flags = libc::SA_RESTART;
            if libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut()) < 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(())
    }

    fn cloexec_pipe() -> std::io::Result<[libc::c_int; 2]> {
        let mut fds: [libc::c_int; 2] = [-1, -1];
        // Safety: plain libc calls on fds we own.
        unsafe {
            if libc::pipe(fds.as_mut_ptr()) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            for fd in fds {
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }
        Ok(fds)
    }

    /// The one SIGINT disposition of the process, shared by every
    /// `PosixSignals`.  Each interrupt is fanned out to all registered
    /// handlers; the kernel-level handler is in place exactly while at least
    /// one handler is registered.
    struct Dispatcher {
        handlers: Mutex<Vec<(u64, Arc<Handler>)>>,
        next_id: AtomicU64,
    }

    static DISPATCHER: OnceLock<Dispatcher> = OnceLock::new();

    impl Dispatcher {
        fn get() -> &'static Dispatcher {
            DISPATCHER.get_or_init(|| Dispatcher {
                handlers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            })
        }

        /// Start the wake pipe and its watcher thread, once per process.
        fn start_watcher(&'static self) -> std::io::Result<()> {
            if WAKE_FD.load(Ordering::SeqCst) >= 0 {
                return Ok(());
            }
            let [read_fd, write_fd] = cloexec_pipe()?;
            // Safety: we own read_fd and nothing else closes it.
            let mut wake = unsafe { std::fs::File::from_raw_fd(read_fd) };
            std::thread::spawn(move || {
                let mut buf = [0u8; 16];
                loop {
                    match wake.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            for _ in 0..n {
                                self.dispatch();
                            }
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                        Err(_) => break,
                    }
                }
            });
            WAKE_FD.store(write_fd, Ordering::SeqCst);
            Ok(())
        }

        fn dispatch(&self) {
            // Handlers may uninstall themselves, so don't hold the lock
            // while running them.
            let handlers: Vec<Arc<Handler>> = self
                .handlers
                .lock()
                .unwrap()
                .iter()
                .map(|(_, h)| h.clone())
                .collect();
            for handler in handlers {
                handler();
            }
        }

        fn register(&'static self, handler: Handler) -> anyhow::Result<u64> {
            let mut handlers = self.handlers.lock().unwrap();
            if handlers.is_empty() {
                self.start_watcher()?;
                sigint_action(sigint_handler as extern "C" fn(libc::c_int) as libc::sighandler_t)?;
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            handlers.push((id, Arc::new(handler)));
            Ok(id)
        }

        fn unregister(&self, id: u64) {
            let mut handlers = self.handlers.lock().unwrap();
            handlers.retain(|(h, _)| *h != id);
            if handlers.is_empty() {
                // Restoring the default disposition can't fail for SIGINT.
                let _ = sigint_action(libc::SIG_DFL);
            }
        }

        fn has_handlers(&self) -> bool {
            !self.handlers.lock().unwrap().is_empty()
        }
    }

    /// SIGINT handling for one owner, e.g. one engine's process manager.
    /// Any number of these may exist; they share the process's single
    /// disposition, and every installed one sees every interrupt.
    #[derive(Default)]
    pub struct PosixSignals {
        /// Our registration with the dispatcher, while installed.
        registration: Mutex<Option<u64>>,
    }

    impl PosixSignals {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Signals for PosixSignals {
        fn install(&self, handler: Handler) -> anyhow::Result<()> {
            let mut registration = self.registration.lock().unwrap();
            if registration.is_some() {
                anyhow::bail!("SIGINT handler already installed");
            }
            *registration = Some(Dispatcher::get().register(handler)?);
            Ok(())
        }

        fn uninstall(&self) {
            if let Some(id) = self.registration.lock().unwrap().take() {
                Dispatcher::get().unregister(id);
            }
        }

        fn kill(&self, pid: u32, signal: Signal) -> std::io::Result<()> {
            let signo = match signal {
                Signal::Interrupt => libc::SIGINT,
                Signal::Kill => libc::SIGKILL,
            };
            // Safety: kill() has no memory safety requirements.
            if unsafe { libc::kill(pid as libc::pid_t, signo) } < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        }

        /// Only the last owner to let go terminates the host; while others
        /// are still installed they are waiting on children of their own.
        fn reraise(&self) {
            if Dispatcher::get().has_handlers() {
                return;
            }
            unsafe {
                libc::kill(libc::getpid(), libc::SIGINT);
            }
        }
    }
}

#[cfg(unix)]
pub use posix::PosixSignals;

/// The signal implementation for the current platform.
#[cfg(unix)]
pub fn platform_signals() -> Box<dyn Signals> {
    Box::new(PosixSignals::new())
}

#[cfg(not(unix))]
pub fn platform_signals() -> Box<dyn Signals> {
    struct Unsupported;
    impl Signals for Unsupported {
        fn install(&self, _handler: Handler) -> anyhow::Result<()> {
            Ok(())
        }
        fn uninstall(&self) {}
        fn kill(&self, _pid: u32, _signal: Signal) -> std::io::Result<()> {
            Err(std::io::ErrorKind::Unsupported.into())
        }
        fn reraise(&self) {
            std::process::exit(130);
        }
    }
    Box::new(Unsupported)
}
