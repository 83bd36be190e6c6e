// src/errors.rs -- error types for Lazytex
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! The crate-wide error chain.
//!
//! Recoverable misses never travel through these types: a cache read that
//! finds nothing is [`crate::io::OpenResult::NotAvailable`], an
//! unresolvable package is `None`. `Err` is reserved for conditions the
//! caller cannot paper over locally — a registry that will not load, an
//! engine that cannot start, malformed metadata that has to be skipped.

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        AppDirs(::app_dirs::AppDirsError);
        Io(::std::io::Error);
        Json(::serde_json::Error);
        Reqwest(::reqwest::Error);
        TomlDe(::toml::de::Error);
        TomlSer(::toml::ser::Error);
    }

    errors {
        Malformed(detail: String) {
            description("malformed resource")
            display("malformed resource: {}", detail)
        }

        PathForbidden(path: String) {
            description("path outside the TeX root")
            display("path \"{}\" lies outside the TeX root", path)
        }

        EngineFailure(code: i32) {
            description("the TeX engine failed")
            display("the TeX engine exited with status {} and produced no output", code)
        }

        RegistryUnavailable {
            description("the bundle registry could not be loaded")
            display("the bundle registry could not be loaded")
        }

        Cancelled {
            description("the compilation was cancelled")
            display("the compilation was cancelled")
        }
    }
}

impl Error {
    /// Write out this error and its chain of causes, one per line.
    pub fn dump(&self, prefix: &str) -> String {
        let mut text = format!("{}error: {}\n", prefix, self);

        for inner in self.iter().skip(1) {
            text.push_str(&format!("{}caused by: {}\n", prefix, inner));
        }

        text
    }
}
