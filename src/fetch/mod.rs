// src/fetch/mod.rs -- resolving packages no bundle provides
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! The package fetcher.
//!
//! When a compile fails because some package is in no bundle, the fetcher
//! asks the repository proxy for it, writes the result into the blob
//! store, and remembers the outcome in a `pkg:<name>` record. Negative
//! outcomes are remembered too, so a hopeless name is asked about at most
//! once per cache-version epoch. Names the repository knows under a
//! different identifier are learned into a persistent alias table.
//!
//! Everything here is soft-failure: an unresolvable package is `None`,
//! never an error.

pub mod names;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::coalesce::InFlight;
use crate::io::{is_canonical_path, OpenResult};
use crate::net::{join_url, Transport};
use crate::status::StatusBackend;
use crate::store::{package_record_key, Store, ALIASES_RECORD_KEY};
use crate::{lt_note, lt_warning};

/// Bumping this constant invalidates every persisted `pkg:<name>` record,
/// positive and negative alike.
pub const CACHE_VERSION: u32 = 4;

/// The persisted outcome of a package resolution.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PkgRecord {
    pub name: String,

    #[serde(default)]
    pub canonical_paths: Vec<String>,

    #[serde(default)]
    pub dependencies: Vec<String>,

    pub cache_version: u32,

    #[serde(default)]
    pub not_found: bool,
}

/// What a successful resolution hands back to the orchestrator.
#[derive(Clone, Debug, Default)]
pub struct FetchedPackage {
    pub files: HashMap<String, Vec<u8>>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProxyFile {
    #[serde(default)]
    content: String,

    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProxyFetchResponse {
    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    files: HashMap<String, ProxyFile>,

    #[serde(default)]
    dependencies: Vec<String>,

    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProxyDepsResponse {
    #[serde(default)]
    dependencies: Vec<String>,
}

pub struct PackageFetcher {
    proxy_url: String,
    transport: Arc<dyn Transport>,
    store: Store,
    aliases: Mutex<Option<HashMap<String, String>>>,
    session_files: Mutex<Vec<String>>,
    in_flight: InFlight,
    bytes_downloaded: AtomicU64,
    packages_fetched: AtomicU64,
}

impl PackageFetcher {
    pub fn new<S: Into<String>>(
        proxy_url: S,
        transport: Arc<dyn Transport>,
        store: Store,
    ) -> PackageFetcher {
        PackageFetcher {
            proxy_url: proxy_url.into(),
            transport,
            store,
            aliases: Mutex::new(None),
            session_files: Mutex::new(Vec::new()),
            in_flight: InFlight::new(),
            bytes_downloaded: AtomicU64::new(0),
            packages_fetched: AtomicU64::new(0),
        }
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::SeqCst)
    }

    /// How many packages this fetcher has pulled over the network.
    pub fn packages_fetched(&self) -> u64 {
        self.packages_fetched.load(Ordering::SeqCst)
    }

    /// Canonical paths handed out this session, in the order they were
    /// first produced. The orchestrator uses this to decide what to mount
    /// before a retry.
    pub fn mounted_files(&self) -> Vec<String> {
        self.session_files.lock().unwrap().clone()
    }

    /// Resolve one package. `None` means the repository cannot provide
    /// it, or we could not find out this time.
    pub fn fetch_package(
        &self,
        name: &str,
        status: &mut dyn StatusBackend,
    ) -> Option<FetchedPackage> {
        loop {
            if let Some(outcome) = self.consult_cache(name, status) {
                return outcome;
            }

            if let Some(_guard) = self.in_flight.claim(name) {
                let target = self
                    .resolve_alias(name)
                    .unwrap_or_else(|| name.to_owned());
                let mut visited = HashSet::new();
                return self.fetch_over_network(name, &target, &mut visited, status);
            }

            // Another caller just finished this name; re-consult the cache.
        }
    }

    /// Resolve a package and, recursively, everything it depends on.
    /// Cycle-safe; unresolvable dependencies are skipped.
    pub fn fetch_with_dependencies(
        &self,
        name: &str,
        status: &mut dyn StatusBackend,
    ) -> HashMap<String, Vec<u8>> {
        let mut visited = HashSet::new();
        let mut queue = vec![name.to_owned()];
        let mut files = HashMap::new();

        while let Some(package) = queue.pop() {
            if !visited.insert(package.clone()) {
                continue;
            }

            if let Some(fetched) = self.fetch_package(&package, status) {
                files.extend(fetched.files);
                queue.extend(fetched.dependencies);
            }
        }

        files
    }

    /// The cache protocol: `Some(outcome)` short-circuits, `None` falls
    /// through to the network.
    fn consult_cache(
        &self,
        name: &str,
        status: &mut dyn StatusBackend,
    ) -> Option<Option<FetchedPackage>> {
        let value = self.store.records().get_record(&package_record_key(name))?;

        let record: PkgRecord = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(_) => return None,
        };

        if record.cache_version != CACHE_VERSION {
            // A stale epoch; treat the record as absent.
            return None;
        }

        if record.not_found {
            return Some(None);
        }

        let mut files = HashMap::new();

        for path in &record.canonical_paths {
            match self.store.blobs().read_blob(path) {
                OpenResult::Ok(bytes) => {
                    files.insert(path.clone(), bytes);
                }
                OpenResult::NotAvailable => return None,
                OpenResult::Err(e) => {
                    lt_warning!(status, "could not read cached \"{}\"", path; e);
                    return None;
                }
            }
        }

        self.note_session_files(record.canonical_paths.iter());

        Some(Some(FetchedPackage {
            files,
            dependencies: record.dependencies,
        }))
    }

    fn fetch_over_network(
        &self,
        requested: &str,
        target: &str,
        visited: &mut HashSet<String>,
        status: &mut dyn StatusBackend,
    ) -> Option<FetchedPackage> {
        if !visited.insert(target.to_owned()) {
            return None;
        }

        let url = join_url(&self.proxy_url, &format!("api/fetch/{}", target));

        let bytes = match self.transport.get(&url) {
            OpenResult::Ok(b) => b,
            OpenResult::NotAvailable => {
                // A definite miss. See whether the repository knows the
                // name as part of a parent package before giving up.
                if let Some(parent) = self.query_parent(target, status) {
                    if parent != target {
                        lt_note!(
                            status,
                            "package \"{}\" is provided by \"{}\"",
                            target,
                            parent
                        );
                        self.learn_alias(requested, &parent, status);
                        return self.fetch_over_network(requested, &parent, visited, status);
                    }
                }

                self.persist_negative(requested, status);
                return None;
            }
            OpenResult::Err(e) => {
                // Transport trouble is not a verdict; stay fetchable.
                lt_warning!(status, "could not reach the package repository for \"{}\"", target; e);
                return None;
            }
        };

        self.bytes_downloaded
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);

        let response: ProxyFetchResponse = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                lt_warning!(
                    status,
                    "malformed repository response for \"{}\": {}",
                    target,
                    e
                );
                return None;
            }
        };

        if let Some(message) = response.error {
            lt_note!(
                status,
                "repository cannot provide \"{}\": {}",
                target,
                message
            );
            self.persist_negative(requested, status);
            return None;
        }

        let mut files = HashMap::new();

        for (path, file) in response.files {
            if !is_canonical_path(&path) {
                lt_warning!(
                    status,
                    "package \"{}\": rejecting malformed path \"{}\"",
                    target,
                    path
                );
                continue;
            }

            let contents = match file.encoding.as_ref().map(|s| s.as_str()) {
                Some("base64") => match base64::decode(&file.content) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        lt_warning!(
                            status,
                            "package \"{}\": undecodable contents for \"{}\": {}",
                            target,
                            path,
                            e
                        );
                        continue;
                    }
                },
                _ => file.content.into_bytes(),
            };

            if let Err(e) = self.store.blobs().write_blob(&path, &contents) {
                lt_warning!(status, "could not persist \"{}\"", path; e);
            }

            files.insert(path, contents);
        }

        let mut dependencies = response.dependencies;
        if dependencies.is_empty() {
            dependencies = self.query_dependencies(target);
        }

        let canonical_name = response.name.unwrap_or_else(|| target.to_owned());
        if canonical_name != requested {
            self.learn_alias(requested, &canonical_name, status);
        }

        let record = PkgRecord {
            name: canonical_name,
            canonical_paths: files.keys().cloned().collect(),
            dependencies: dependencies.clone(),
            cache_version: CACHE_VERSION,
            not_found: false,
        };

        self.persist_record(requested, &record, status);

        self.packages_fetched.fetch_add(1, Ordering::SeqCst);
        self.note_session_files(files.keys());

        lt_note!(
            status,
            "fetched package \"{}\" ({} files)",
            requested,
            files.len()
        );

        Some(FetchedPackage {
            files,
            dependencies,
        })
    }

    /// Ask `/api/pkg/<name>` whether the repository files this name under
    /// a parent package.
    fn query_parent(&self, name: &str, _status: &mut dyn StatusBackend) -> Option<String> {
        let url = join_url(&self.proxy_url, &format!("api/pkg/{}", name));

        let bytes = match self.transport.get(&url) {
            OpenResult::Ok(b) => b,
            _ => return None,
        };

        self.bytes_downloaded
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);

        let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

        for field in &["miktex", "texlive"] {
            if let Some(parent) = value.get(*field).and_then(|v| v.as_str()) {
                if !parent.is_empty() {
                    return Some(parent.to_owned());
                }
            }
        }

        None
    }

    fn query_dependencies(&self, name: &str) -> Vec<String> {
        let url = join_url(&self.proxy_url, &format!("api/deps/{}", name));

        let bytes = match self.transport.get(&url) {
            OpenResult::Ok(b) => b,
            _ => return Vec::new(),
        };

        self.bytes_downloaded
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);

        match serde_json::from_slice::<ProxyDepsResponse>(&bytes) {
            Ok(r) => r.dependencies,
            Err(_) => Vec::new(),
        }
    }

    fn persist_negative(&self, name: &str, status: &mut dyn StatusBackend) {
        let record = PkgRecord {
            name: name.to_owned(),
            canonical_paths: Vec::new(),
            dependencies: Vec::new(),
            cache_version: CACHE_VERSION,
            not_found: true,
        };

        self.persist_record(name, &record, status);
    }

    fn persist_record(&self, key_name: &str, record: &PkgRecord, status: &mut dyn StatusBackend) {
        let value = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(_) => return,
        };

        if let Err(e) = self
            .store
            .records()
            .put_record(&package_record_key(key_name), &value)
        {
            lt_warning!(status, "could not persist record for \"{}\"", key_name; e);
        }
    }

    fn note_session_files<'a, I: Iterator<Item = &'a String>>(&self, paths: I) {
        let mut session = self.session_files.lock().unwrap();

        for path in paths {
            if !session.contains(path) {
                session.push(path.clone());
            }
        }
    }

    // Alias table plumbing. The table is one record, loaded lazily and
    // kept in memory thereafter.

    fn with_aliases<T, F: FnOnce(&mut HashMap<String, String>) -> T>(&self, f: F) -> T {
        let mut guard = self.aliases.lock().unwrap();

        if guard.is_none() {
            let loaded = self
                .store
                .records()
                .get_record(ALIASES_RECORD_KEY)
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            *guard = Some(loaded);
        }

        f(guard.as_mut().unwrap())
    }

    pub fn resolve_alias(&self, name: &str) -> Option<String> {
        self.with_aliases(|table| table.get(name).cloned())
    }

    fn learn_alias(&self, requested: &str, canonical: &str, status: &mut dyn StatusBackend) {
        let table = self.with_aliases(|table| {
            table.insert(requested.to_owned(), canonical.to_owned());
            table.clone()
        });

        match serde_json::to_value(&table) {
            Ok(value) => {
                if let Err(e) = self.store.records().put_record(ALIASES_RECORD_KEY, &value) {
                    lt_warning!(status, "could not persist the alias table"; e);
                }
            }
            Err(_) => {}
        }
    }
}
