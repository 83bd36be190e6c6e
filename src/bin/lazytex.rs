// src/bin/lazytex.rs -- command-line frontend for Lazytex
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! Materialise the TeX support tree a document needs.
//!
//! The engine itself is an external collaborator, so the CLI stops at the
//! engine boundary: it scans the document, picks an engine, resolves the
//! bundle closure, and mounts it onto a real directory, then prints the
//! argv an engine binding would be invoked with.

use std::fs::File;
use std::io::Read;
use std::process;
use std::str::FromStr;
use std::sync::Arc;

use clap::{crate_version, App, Arg};

use lazytex::bundles::BundleManager;
use lazytex::config::PersistentConfig;
use lazytex::engines::{engine_argv, Engine};
use lazytex::errors::{Result, ResultExt};
use lazytex::io::DiskFs;
use lazytex::net::ReqwestTransport;
use lazytex::scan::scan_packages;
use lazytex::select::EngineSelector;
use lazytex::status::termcolor::{ChatterLevel, TermcolorStatusBackend};
use lazytex::status::StatusBackend;
use lazytex::store::{filesystem::FilesystemStore, Store};
use lazytex::{ctry, lt_note};

fn main() {
    let matches = App::new("lazytex")
        .version(crate_version!())
        .about("Materialise the TeX support tree a document needs.")
        .arg(
            Arg::with_name("INPUT")
                .help("The LaTeX document to analyse")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("dest")
                .long("dest")
                .short("d")
                .value_name("DIR")
                .help("Directory to materialise the tree into")
                .default_value("texlive-tree"),
        )
        .arg(
            Arg::with_name("engine")
                .long("engine")
                .value_name("ENGINE")
                .help("Force an engine instead of auto-selecting")
                .possible_values(&["auto", "pdflatex", "xelatex", "lualatex"])
                .default_value("auto"),
        )
        .arg(
            Arg::with_name("bundle_url")
                .long("bundle-url")
                .value_name("URL")
                .help("Override the configured bundle base URL"),
        )
        .arg(
            Arg::with_name("chatter")
                .long("chatter")
                .short("c")
                .value_name("LEVEL")
                .help("How much progress information to print")
                .possible_values(&["default", "minimal"])
                .default_value("default"),
        )
        .get_matches();

    let chatter = match matches.value_of("chatter").unwrap() {
        "minimal" => ChatterLevel::Minimal,
        _ => ChatterLevel::Normal,
    };

    let mut status = TermcolorStatusBackend::new(chatter);

    if let Err(e) = inner(&matches, &mut status) {
        status.bare_error(&e);
        process::exit(1);
    }
}

fn inner(matches: &clap::ArgMatches, status: &mut TermcolorStatusBackend) -> Result<()> {
    let input_path = matches.value_of("INPUT").unwrap();
    let dest = matches.value_of("dest").unwrap();

    let mut source = String::new();
    let mut f = ctry!(File::open(input_path); "could not open \"{}\"", input_path);
    ctry!(f.read_to_string(&mut source); "could not read \"{}\"", input_path);

    let mut config = PersistentConfig::open(true)?;
    if let Some(url) = matches.value_of("bundle_url") {
        config.set_bundle_url(url);
    }

    let backing = Arc::new(FilesystemStore::new(config.cache_root()?)?);
    let store = Store::new(backing.clone(), backing);

    let transport = Arc::new(ReqwestTransport::new()?);
    let bundles = BundleManager::new(config.bundle_url(), transport, store.clone());
    let selector = EngineSelector::new(store);

    let engine = match matches.value_of("engine").unwrap() {
        "auto" => {
            let choice = selector.choose(&source);
            lt_note!(status, "selected {}: {}", choice.engine, choice.reason);
            choice.engine
        }
        name => Engine::from_str(name)?,
    };

    let packages = scan_packages(&source);
    lt_note!(status, "document asks for: {}", packages.join(", "));

    bundles.load_registry(status)?;
    let closure = bundles.resolve_bundles(&packages, engine)?;
    lt_note!(status, "bundle closure: {}", closure.join(", "));

    let mut fs = DiskFs::new(dest);
    let mounted = bundles.mount_bundles(&closure, &mut fs, status);

    lt_note!(
        status,
        "mounted {} of {} bundles under {} ({} bytes downloaded)",
        mounted,
        closure.len(),
        dest,
        bundles.bytes_downloaded()
    );

    let argv = engine_argv(engine, input_path);
    lt_note!(status, "engine invocation: {}", argv.join(" "));

    Ok(())
}
