#[cfg(unix)]
mod unix {
    /// Whether stderr, where all our messages go, is a terminal.
    pub fn use_fancy() -> bool {
        if std::env::var_os("NO_COLOR").is_some() {
            return false;
        }
        unsafe { libc::isatty(/* stderr */ 2) == 1 }
    }
}

#[cfg(unix)]
pub use unix::*;

#[cfg(not(unix))]
mod other {
    pub fn use_fancy() -> bool {
        false
    }
}

#[cfg(not(unix))]
pub use other::*;
