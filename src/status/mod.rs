// src/status/mod.rs -- reporting status messages to the user
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! A channel for reporting status to the user.
//!
//! There is no global logger. Operations that can report progress or soft
//! failures take a `&mut dyn StatusBackend`, and the `lt_note!`,
//! `lt_warning!`, and `lt_error!` macros format through it. Library
//! embedders that want silence pass [`NoopStatusBackend`].

pub mod termcolor;

use std::fmt::Arguments;

use crate::errors::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
    Note,
    Warning,
    Error,
}

/// Anything that can accept status reports.
pub trait StatusBackend {
    /// Report a message to the status backend, optionally with an error
    /// whose chain of causes should be shown after it.
    fn report(&mut self, kind: MessageKind, args: Arguments, err: Option<&Error>);
}

/// A backend that swallows everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStatusBackend {}

impl NoopStatusBackend {
    pub fn new() -> NoopStatusBackend {
        Default::default()
    }
}

impl StatusBackend for NoopStatusBackend {
    fn report(&mut self, _kind: MessageKind, _args: Arguments, _err: Option<&Error>) {}
}

/// A backend that collects reports into a string, for tests and for
/// assembling compile logs.
#[derive(Debug, Default)]
pub struct BufferStatusBackend {
    buffer: String,
}

impl BufferStatusBackend {
    pub fn new() -> BufferStatusBackend {
        Default::default()
    }

    pub fn messages(&self) -> &str {
        &self.buffer
    }
}

impl StatusBackend for BufferStatusBackend {
    fn report(&mut self, kind: MessageKind, args: Arguments, err: Option<&Error>) {
        let tag = match kind {
            MessageKind::Note => "note",
            MessageKind::Warning => "warning",
            MessageKind::Error => "error",
        };

        self.buffer.push_str(&format!("{}: {}\n", tag, args));

        if let Some(e) = err {
            self.buffer.push_str(&e.dump("  "));
        }
    }
}

#[macro_export]
macro_rules! lt_note {
    ($dest:expr, $( $fmt_args:expr ),*) => {
        $dest.report($crate::status::MessageKind::Note,
                     format_args!($( $fmt_args ),*), None)
    };
}

#[macro_export]
macro_rules! lt_warning {
    ($dest:expr, $( $fmt_args:expr ),* ; $err:expr) => {
        $dest.report($crate::status::MessageKind::Warning,
                     format_args!($( $fmt_args ),*), Some(&$err))
    };

    ($dest:expr, $( $fmt_args:expr ),*) => {
        $dest.report($crate::status::MessageKind::Warning,
                     format_args!($( $fmt_args ),*), None)
    };
}

#[macro_export]
macro_rules! lt_error {
    ($dest:expr, $( $fmt_args:expr ),* ; $err:expr) => {
        $dest.report($crate::status::MessageKind::Error,
                     format_args!($( $fmt_args ),*), Some(&$err))
    };

    ($dest:expr, $( $fmt_args:expr ),*) => {
        $dest.report($crate::status::MessageKind::Error,
                     format_args!($( $fmt_args ),*), None)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::{lt_note, lt_warning};

    #[test]
    fn buffer_backend_collects_reports() {
        let mut status = BufferStatusBackend::new();

        lt_note!(status, "mounted {} bundles", 3);
        let err = crate::errors::Error::from(ErrorKind::RegistryUnavailable);
        lt_warning!(status, "registry trouble"; err);

        let text = status.messages();
        assert!(text.contains("note: mounted 3 bundles"));
        assert!(text.contains("warning: registry trouble"));
        assert!(text.contains("could not be loaded"));
    }
}
