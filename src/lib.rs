// src/lib.rs -- lazy materialisation of TeX support trees
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! Lazytex resolves, fetches, caches, and mounts the subset of a TeX
//! distribution that a document actually needs, then drives a black-box TeX
//! engine through a mount/run/recover loop.
//!
//! The crate is organised around a handful of seams:
//!
//! - [`store`] — the persistent byte/record stores backing all caches;
//! - [`bundles`] — resolution and mounting of pre-built compressed bundles;
//! - [`fetch`] — on-demand resolution of packages no bundle provides;
//! - [`select`] — choosing the right engine from document features and
//!   learned compile statistics;
//! - [`driver`] — the compilation orchestrator tying it all together.
//!
//! The TeX engine itself is not part of this crate: it is injected behind
//! the [`engines::TexEngine`] trait and sees the materialised tree through
//! the [`io::EngineFs`] capability.

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;

/// Chain a context message onto a fallible expression and `?` the result.
#[macro_export]
macro_rules! ctry {
    ($op:expr ; $( $chain_fmt_args:expr ),*) => {
        $op.chain_err(|| format!($( $chain_fmt_args ),*))?
    };
}

/// Produce an `Err` built from a formatted message.
#[macro_export]
macro_rules! errmsg {
    ($( $fmt_args:expr ),*) => {
        Err($crate::errors::ErrorKind::Msg(format!($( $fmt_args ),*)).into())
    };
}

#[macro_use]
pub mod status;

pub mod bundles;
pub mod coalesce;
pub mod config;
pub mod driver;
pub mod engines;
pub mod errors;
pub mod fetch;
pub mod io;
pub mod net;
pub mod scan;
pub mod select;
pub mod store;

pub use crate::errors::{Error, ErrorKind, Result};
