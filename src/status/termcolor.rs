// src/status/termcolor.rs -- colorized terminal status reporting
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! A terminal status backend built on the `termcolor` crate, used by the
//! command-line frontend.

use std::fmt::Arguments;
use std::io::Write;

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use super::{MessageKind, StatusBackend};
use crate::errors::Error;

/// How chatty the terminal backend should be.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChatterLevel {
    Minimal,
    Normal,
}

pub struct TermcolorStatusBackend {
    chatter: ChatterLevel,
    stdout: StandardStream,
    stderr: StandardStream,
    note_spec: ColorSpec,
    warning_spec: ColorSpec,
    error_spec: ColorSpec,
}

impl TermcolorStatusBackend {
    pub fn new(chatter: ChatterLevel) -> TermcolorStatusBackend {
        let mut note_spec = ColorSpec::new();
        note_spec.set_fg(Some(Color::Green)).set_bold(true);

        let mut warning_spec = ColorSpec::new();
        warning_spec.set_fg(Some(Color::Yellow)).set_bold(true);

        let mut error_spec = ColorSpec::new();
        error_spec.set_fg(Some(Color::Red)).set_bold(true);

        TermcolorStatusBackend {
            chatter,
            stdout: StandardStream::stdout(ColorChoice::Auto),
            stderr: StandardStream::stderr(ColorChoice::Auto),
            note_spec,
            warning_spec,
            error_spec,
        }
    }

    fn styled_prefix(&mut self, kind: MessageKind) {
        let (spec, text) = match kind {
            MessageKind::Note => (self.note_spec.clone(), "note:"),
            MessageKind::Warning => (self.warning_spec.clone(), "warning:"),
            MessageKind::Error => (self.error_spec.clone(), "error:"),
        };

        let stream = match kind {
            MessageKind::Note => &mut self.stdout,
            _ => &mut self.stderr,
        };

        // Colorization failures aren't worth aborting over.
        let _ = stream.set_color(&spec);
        let _ = write!(stream, "{}", text);
        let _ = stream.reset();
    }

    /// Print an error chain without going through the report interface, for
    /// use before a backend has been fully set up.
    pub fn bare_error(&mut self, err: &Error) {
        let _ = write!(self.stderr, "{}", err.dump(""));
    }
}

impl StatusBackend for TermcolorStatusBackend {
    fn report(&mut self, kind: MessageKind, args: Arguments, err: Option<&Error>) {
        if kind == MessageKind::Note && self.chatter == ChatterLevel::Minimal {
            return;
        }

        self.styled_prefix(kind);

        match kind {
            MessageKind::Note => {
                let _ = writeln!(self.stdout, " {}", args);
            }
            _ => {
                let _ = writeln!(self.stderr, " {}", args);
                if let Some(e) = err {
                    let _ = write!(self.stderr, "{}", e.dump("  "));
                }
            }
        }
    }
}
