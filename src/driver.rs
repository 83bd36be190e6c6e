// src/driver.rs -- the compilation orchestrator
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! Driving one compile from source text to a PDF (or a diagnosed failure).
//!
//! The loop is an explicit state machine: select an engine and compute the
//! bundle closure, mount it, run the engine, inspect the outcome, and —
//! when the log names files the tree does not have — recover by fetching
//! the packages behind them and retrying. Missing files are a data-driven
//! signal here, not an error. Every retry either strictly enlarges the
//! mounted file set or ends the loop, and a bounded retry count backs that
//! up.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;

use crate::bundles::BundleManager;
use crate::engines::{engine_argv, Engine, TexEngine};
use crate::errors::{ErrorKind, Result};
use crate::fetch::{names::package_for_missing_file, PackageFetcher};
use crate::io::{EngineFs, OpenResult};
use crate::scan::{requires_unicode_engine, scan_packages};
use crate::select::{CompileRecord, Confidence, EngineChoice, EngineSelector};
use crate::status::StatusBackend;
use crate::{lt_note, lt_warning};

/// The pdflatex error that the legacy-font-expansion flag learns from.
pub const LEGACY_FONT_EXPANSION_TOKEN: &str =
    "auto expansion is only possible with scalable fonts";

/// Recovery rounds per compile.
const DEFAULT_RETRY_BOUND: u32 = 3;

/// Where user inputs land in the engine filesystem.
const WORK_DIR: &str = "/work";

lazy_static! {
    static ref MISSING_FILE_RE: Regex =
        Regex::new(r"! LaTeX Error: File `([^']+)' not found").unwrap();
    static ref PACKAGE_FILE_RE: Regex =
        Regex::new(r"! Package \S+ Error: .*?file ([^\s]+)").unwrap();
}

/// A cooperative cancellation signal, checked at suspension points. A new
/// compile request cancels the previous one by flipping its token;
/// in-flight fetches still complete into the cache.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        Default::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CompileStats {
    pub bundles_loaded: usize,
    pub bytes_downloaded: u64,
    pub retries: u32,
    pub packages_fetched: u64,
}

#[derive(Debug)]
pub struct CompileOutcome {
    pub success: bool,
    pub pdf: Option<Vec<u8>>,
    pub log: String,
    pub engine: Engine,
    pub stats: CompileStats,
}

/// Builds a [`CompileSession`].
#[derive(Default)]
pub struct CompileSessionBuilder {
    bundles: Option<Arc<BundleManager>>,
    fetcher: Option<Arc<PackageFetcher>>,
    selector: Option<Arc<EngineSelector>>,
    engine: Option<Box<dyn TexEngine>>,
    filesystem: Option<Box<dyn EngineFs>>,
    main_name: Option<String>,
    source: Option<String>,
    extra_inputs: Vec<(String, Vec<u8>)>,
    engine_override: Option<Engine>,
    cancel: Option<CancelToken>,
    retry_bound: Option<u32>,
}

impl CompileSessionBuilder {
    pub fn new() -> CompileSessionBuilder {
        Default::default()
    }

    pub fn bundles(mut self, bundles: Arc<BundleManager>) -> Self {
        self.bundles = Some(bundles);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<PackageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn selector(mut self, selector: Arc<EngineSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn engine(mut self, engine: Box<dyn TexEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn filesystem(mut self, filesystem: Box<dyn EngineFs>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    /// The main input: its file name inside the work directory and its
    /// source text.
    pub fn main_input<N: Into<String>, S: Into<String>>(mut self, name: N, source: S) -> Self {
        self.main_name = Some(name.into());
        self.source = Some(source.into());
        self
    }

    /// An auxiliary input written next to the main file.
    pub fn extra_input<N: Into<String>>(mut self, name: N, bytes: Vec<u8>) -> Self {
        self.extra_inputs.push((name.into(), bytes));
        self
    }

    /// Skip engine selection and use `engine`.
    pub fn engine_override(mut self, engine: Engine) -> Self {
        self.engine_override = Some(engine);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn retry_bound(mut self, bound: u32) -> Self {
        self.retry_bound = Some(bound);
        self
    }

    pub fn build(self) -> Result<CompileSession> {
        let bundles = require(self.bundles, "a bundle manager")?;
        let fetcher = require(self.fetcher, "a package fetcher")?;
        let selector = require(self.selector, "an engine selector")?;
        let engine = require(self.engine, "an engine")?;
        let filesystem = require(self.filesystem, "an engine filesystem")?;
        let main_name = require(self.main_name, "a main input")?;
        let source = require(self.source, "a main input")?;

        Ok(CompileSession {
            bundles,
            fetcher,
            selector,
            engine,
            filesystem,
            main_name,
            source,
            extra_inputs: self.extra_inputs,
            engine_override: self.engine_override,
            cancel: self.cancel.unwrap_or_default(),
            retry_bound: self.retry_bound.unwrap_or(DEFAULT_RETRY_BOUND),
        })
    }
}

fn require<T>(value: Option<T>, what: &str) -> Result<T> {
    match value {
        Some(v) => Ok(v),
        None => Err(ErrorKind::Msg(format!("compile session needs {}", what)).into()),
    }
}

pub struct CompileSession {
    bundles: Arc<BundleManager>,
    fetcher: Arc<PackageFetcher>,
    selector: Arc<EngineSelector>,
    engine: Box<dyn TexEngine>,
    filesystem: Box<dyn EngineFs>,
    main_name: String,
    source: String,
    extra_inputs: Vec<(String, Vec<u8>)>,
    engine_override: Option<Engine>,
    cancel: CancelToken,
    retry_bound: u32,
}

impl CompileSession {
    /// Run the compile to completion (or cancellation).
    pub fn run(&mut self, status: &mut dyn StatusBackend) -> Result<CompileOutcome> {
        let started = Instant::now();

        let bytes_before = self.bundles.bytes_downloaded() + self.fetcher.bytes_downloaded();
        let packages_before = self.fetcher.packages_fetched();

        // Select an engine and compute the closure.
        self.check_cancel()?;

        let choice = self.choose_engine();
        let engine = choice.engine;

        lt_note!(
            status,
            "engine: {} ({}; {} confidence)",
            engine,
            choice.reason,
            confidence_name(choice.confidence)
        );

        let packages = scan_packages(&self.source);

        self.bundles.load_registry(status)?;
        let closure = self.bundles.resolve_bundles(&packages, engine)?;

        // Mount the closure and the user's inputs.
        self.check_cancel()?;

        let bundles_loaded = self
            .bundles
            .mount_bundles(&closure, &mut *self.filesystem, status);

        let main_path = format!("{}/{}", WORK_DIR, self.main_name);
        let source_bytes = self.source.as_bytes().to_vec();
        self.filesystem.write_file(&main_path, &source_bytes)?;

        for (name, bytes) in &self.extra_inputs {
            self.filesystem
                .write_file(&format!("{}/{}", WORK_DIR, name), bytes)?;
        }

        let artifact_path = format!("{}/{}.pdf", WORK_DIR, stem_of(&self.main_name));
        let argv = engine_argv(engine, &main_path);

        // Run / inspect / recover.
        let mut full_log = String::new();
        let mut attempted: HashSet<String> = HashSet::new();
        let mut retries = 0;

        let (success, pdf) = loop {
            self.check_cancel()?;

            let exit = self
                .engine
                .run(&mut *self.filesystem, &argv, status)?;

            if !full_log.is_empty() {
                full_log.push('\n');
            }
            full_log.push_str(&exit.log);

            if let OpenResult::Ok(bytes) = self.filesystem.read_file(&artifact_path) {
                if !bytes.is_empty() {
                    break (true, Some(bytes));
                }
            }

            let missing = missing_files_in_log(&exit.log);

            if missing.is_empty() {
                lt_warning!(
                    status,
                    "engine exited with status {} and nothing recoverable in the log",
                    exit.code
                );
                break (false, None);
            }

            if retries >= self.retry_bound {
                lt_warning!(status, "giving up after {} recovery rounds", retries);
                break (false, None);
            }

            let mut progressed = false;

            for file in &missing {
                self.check_cancel()?;

                if self.recover_missing_file(file, &mut attempted, status) {
                    progressed = true;
                }
            }

            if !progressed {
                // Nothing new can be mounted; running again would loop.
                break (false, None);
            }

            retries += 1;
            lt_note!(status, "retrying (pass {})", retries + 1);
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let triggered = full_log.contains(LEGACY_FONT_EXPANSION_TOKEN);

        self.selector.record_result(
            &self.source,
            &CompileRecord {
                engine,
                success,
                time_ms: elapsed_ms,
                triggered_legacy_font_expansion: triggered,
            },
            status,
        );

        let stats = CompileStats {
            bundles_loaded,
            bytes_downloaded: self.bundles.bytes_downloaded() + self.fetcher.bytes_downloaded()
                - bytes_before,
            retries,
            packages_fetched: self.fetcher.packages_fetched() - packages_before,
        };

        Ok(CompileOutcome {
            success,
            pdf,
            log: full_log,
            engine,
            stats,
        })
    }

    pub fn filesystem(&self) -> &dyn EngineFs {
        &*self.filesystem
    }

    fn choose_engine(&self) -> EngineChoice {
        if let Some(engine) = self.engine_override {
            return EngineChoice {
                engine,
                reason: "engine fixed by the caller".to_owned(),
                confidence: Confidence::High,
            };
        }

        let choice = self.selector.choose(&self.source);

        // The scanner's Unicode check overrides a mere default, but never
        // a selector decision backed by evidence.
        if choice.engine == Engine::Pdflatex
            && choice.confidence == Confidence::Low
            && requires_unicode_engine(&self.source)
        {
            return EngineChoice {
                engine: Engine::Xelatex,
                reason: "the source requires a Unicode-capable engine".to_owned(),
                confidence: Confidence::Medium,
            };
        }

        choice
    }

    /// Try to materialise one missing file. Returns true when anything
    /// new landed in the engine filesystem.
    fn recover_missing_file(
        &mut self,
        file: &str,
        attempted: &mut HashSet<String>,
        status: &mut dyn StatusBackend,
    ) -> bool {
        // The file manifest may know the file under an already-built
        // bundle; that avoids a repository round trip entirely.
        if let Ok(registry) = self.bundles.registry() {
            if let Some(path) = registry.find_file_by_name(file) {
                let path = path.to_owned();

                if self
                    .filesystem
                    .read_file(&path)
                    .is_not_available()
                {
                    match self.bundles.mount_file(&path, &mut *self.filesystem, status) {
                        Ok(true) => {
                            lt_note!(status, "mounted \"{}\" from its bundle", path);
                            return true;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            lt_warning!(status, "could not mount \"{}\"", path; e);
                        }
                    }
                }
            }
        }

        let package = match package_for_missing_file(file) {
            Some(p) => p,
            None => {
                lt_note!(status, "no package candidate for missing file \"{}\"", file);
                return false;
            }
        };

        // A name that already produced nothing is never retried; this is
        // what guarantees the loop makes progress.
        if !attempted.insert(package.clone()) {
            return false;
        }

        lt_note!(
            status,
            "missing \"{}\": asking the repository for \"{}\"",
            file,
            package
        );

        let files = self.fetcher.fetch_with_dependencies(&package, status);

        let mut progressed = false;

        for (path, bytes) in files {
            let fresh = self.filesystem.read_file(&path).is_not_available();

            if let Err(e) = self.filesystem.write_file(&path, &bytes) {
                lt_warning!(status, "could not mount fetched \"{}\"", path; e);
                continue;
            }

            if fresh {
                progressed = true;
            }
        }

        progressed
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ErrorKind::Cancelled.into());
        }

        Ok(())
    }
}

fn confidence_name(confidence: Confidence) -> &'static str {
    match confidence {
        Confidence::High => "high",
        Confidence::Medium => "medium",
        Confidence::Low => "low",
    }
}

fn stem_of(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Pull missing-file names out of an engine log, deduplicated in order of
/// first appearance and normalised to bare file names.
pub fn missing_files_in_log(log: &str) -> Vec<String> {
    let mut missing = Vec::new();

    for re in &[&*MISSING_FILE_RE, &*PACKAGE_FILE_RE] {
        for captures in re.captures_iter(log) {
            let raw = &captures[1];
            let name = raw
                .rsplit('/')
                .next()
                .unwrap_or(raw)
                .trim_matches(|c| c == '`' || c == '\'' || c == '"' || c == '.')
                .to_owned();

            if !name.is_empty() && !missing.iter().any(|m| m == &name) {
                missing.push(name);
            }
        }
    }

    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latex_missing_file_errors_are_tokenised() {
        let log = "\
This is pdfTeX
! LaTeX Error: File `lingmacros.sty' not found.
Type X to quit.
! LaTeX Error: File `lingmacros.sty' not found.
! Package fontenc Error: Encoding file t5enc.def not found.
";

        assert_eq!(
            missing_files_in_log(log),
            vec!["lingmacros.sty".to_owned(), "t5enc.def".to_owned()]
        );
    }

    #[test]
    fn clean_logs_have_no_missing_files() {
        assert!(missing_files_in_log("Output written on main.pdf (1 page).").is_empty());
    }

    #[test]
    fn file_name_stems() {
        assert_eq!(stem_of("main.tex"), "main");
        assert_eq!(stem_of("notes"), "notes");
        assert_eq!(stem_of("a.b.tex"), "a.b");
    }

    #[test]
    fn cancel_tokens_are_shared() {
        let token = CancelToken::new();
        let clone = token.clone();

        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
