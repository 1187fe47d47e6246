//! Console messages in the `info:` / `warning [scope]:` format.
//!
//! Verbosity is a single process-wide switch set once at start-up. Library
//! callers get a quiet crate unless they opt in.

use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Turns console messages on or off for the whole process
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

macro_rules! info {
    ($($arg:tt)*) => {
        if $crate::logging::is_verbose() {
            println!("info: {}", format!($($arg)*));
        }
    };
}

macro_rules! warning {
    ($scope:literal, $($arg:tt)*) => {
        if $crate::logging::is_verbose() {
            eprintln!("warning [{}]: {}", $scope, format!($($arg)*));
        }
    };
}

pub(crate) use info;
pub(crate) use warning;
