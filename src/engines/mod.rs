// src/engines/mod.rs -- the TeX engine seam
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! The boundary between Lazytex and the TeX engine proper.
//!
//! The engine is a black box: a `main(argv)`-style entry point over a
//! Unix-like filesystem. Lazytex materialises that filesystem, builds the
//! argv, and interprets the exit status and log; everything else belongs
//! to the engine binding behind [`TexEngine`].

use std::fmt;
use std::str::FromStr;

use crate::errors::{Error, ErrorKind, Result};
use crate::io::EngineFs;
use crate::status::StatusBackend;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Engine {
    Pdflatex,
    Xelatex,
    Lualatex,
}

pub const ALL_ENGINES: &[Engine] = &[Engine::Pdflatex, Engine::Xelatex, Engine::Lualatex];

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match *self {
            Engine::Pdflatex => "pdflatex",
            Engine::Xelatex => "xelatex",
            Engine::Lualatex => "lualatex",
        }
    }

    /// True for engines that handle arbitrary Unicode text and system
    /// fonts natively.
    pub fn is_unicode_capable(&self) -> bool {
        match *self {
            Engine::Pdflatex => false,
            Engine::Xelatex | Engine::Lualatex => true,
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Engine> {
        match s {
            "pdflatex" => Ok(Engine::Pdflatex),
            "xelatex" => Ok(Engine::Xelatex),
            "lualatex" => Ok(Engine::Lualatex),
            other => Err(ErrorKind::Msg(format!("unknown engine \"{}\"", other)).into()),
        }
    }
}

/// Build the argv for one engine invocation of `main_file`.
pub fn engine_argv(engine: Engine, main_file: &str) -> Vec<String> {
    vec![
        engine.as_str().to_owned(),
        "-interaction=nonstopmode".to_owned(),
        "-halt-on-error".to_owned(),
        format!("-fmt={}", engine.as_str()),
        main_file.to_owned(),
    ]
}

/// What one engine run produced.
#[derive(Clone, Debug)]
pub struct EngineExit {
    pub code: i32,
    pub log: String,
}

impl EngineExit {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// The injected engine binding. Implementations own the mapping from the
/// [`EngineFs`] capability to the engine's native filesystem calls.
pub trait TexEngine {
    fn run(
        &mut self,
        fs: &mut dyn EngineFs,
        argv: &[String],
        status: &mut dyn StatusBackend,
    ) -> Result<EngineExit>;
}
