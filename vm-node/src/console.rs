//! # Event logging for a unix terminal
//! Prints node events as styled lines; plain lines when piped.

use std::{
    error::Error,
    io::{self, IsTerminal},
};

#[must_use]
pub fn is_terminal() -> bool {
    io::stdout().is_terminal()
}

pub fn log_string(event: &str, style: &str) {
    if is_terminal() {
        for line in event.split('\n') {
            println!("\x1B{style}{line}\x1B[0m");
        }
    } else {
        // Don't write control characters, just output lines as is
        println!("{event}");
    }
}

pub fn log_error(mut error: &dyn Error) {
    log_string(&format!("{error}"), "[31m");
    while let Some(source) = error.source() {
        log_string(&format!("Caused by: {source}"), "[35m");
        error = source;
    }
}

macro_rules! debug {
    ($($arg:tt)*) => {{
            if std::env::var("VM_VERBOSE").is_ok() {
                crate::console::log_string(&format!($($arg)*), "[90m");
            }
    }};
}

macro_rules! error {
    ($err:expr, $($arg:tt)*) => {{
            crate::console::log_string(&format!($($arg)*), "[33m");
            crate::console::log_error($err);
    }};
    ($err:expr) => {{
            crate::console::log_error($err);
    }}
}

macro_rules! log {
    ($($arg:tt)*) => {{
            crate::console::log_string(&format!($($arg)*), "[0m");
    }};
}

macro_rules! warning {
    ($($arg:tt)*) => {{
            crate::console::log_string(&format!($($arg)*), "[33m");
    }};
}

pub(crate) use {debug, error, log, warning};
