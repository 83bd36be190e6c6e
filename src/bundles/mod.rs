// src/bundles/mod.rs -- resolving and mounting pre-built bundles
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! The bundle layer: turning a (package set, engine) pair into a mounted
//! working set of files.
//!
//! Bundles are immutable named payloads produced offline. The manager
//! loads a global registry once, resolves package sets to an ordered
//! bundle closure, loads payloads through a three-tier cache (in-process
//! map, persistent blob store, network), and writes file extents into the
//! engine filesystem. Concurrent loads of the same bundle coalesce onto a
//! single network fetch.

pub mod meta;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::coalesce::InFlight;
use crate::engines::Engine;
use crate::errors::{ErrorKind, Result};
use crate::io::{EngineFs, OpenResult};
use crate::net::{join_url, Transport};
use crate::status::StatusBackend;
use crate::store::{bundle_blob_key, bundle_meta_key, Store};
use crate::{lt_note, lt_warning};

use self::meta::{decompress_payload, BundleMeta};

/// Bundles every compile needs, whatever the document says.
pub const CORE_BUNDLES: &[&str] = &["core", "latex-base", "l3", "graphics", "tools"];

/// Engine-specific additions to the closure seed.
pub fn engine_bundles(engine: Engine) -> &'static [&'static str] {
    match engine {
        Engine::Pdflatex => &["fmt-pdflatex", "fonts-cm", "amsfonts"],
        Engine::Xelatex => &["fmt-xelatex", "fontspec", "unicode-math"],
        Engine::Lualatex => &["fmt-lualatex", "fontspec", "unicode-math"],
    }
}

/// Where a single file lives inside a bundle payload.
#[derive(Clone, Debug, Deserialize)]
pub struct FileExtent {
    pub bundle: String,
    pub start: usize,
    pub end: usize,
}

/// The global bundle registry, read-only after load.
#[derive(Debug, Default)]
pub struct Registry {
    names: Vec<String>,
    declaration_order: HashMap<String, usize>,
    package_map: HashMap<String, String>,
    file_manifest: HashMap<String, FileExtent>,
    basename_index: HashMap<String, String>,
    bundle_deps: HashMap<String, Vec<String>>,
    package_deps: HashMap<String, Vec<String>>,
}

impl Registry {
    pub fn new(
        names: Vec<String>,
        package_map: HashMap<String, String>,
        file_manifest: HashMap<String, FileExtent>,
        bundle_deps: HashMap<String, Vec<String>>,
        package_deps: HashMap<String, Vec<String>>,
    ) -> Registry {
        let declaration_order: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        // Index manifest paths by bare file name so a missing-file log
        // token can be tried against known bundles before the repository.
        // Ambiguous names keep the lexically smallest path, for
        // determinism.
        let mut basename_index: HashMap<String, String> = HashMap::new();
        for path in file_manifest.keys() {
            if let Some(base) = path.rsplit('/').next() {
                match basename_index.get(base) {
                    Some(existing) if existing <= path => {}
                    _ => {
                        basename_index.insert(base.to_owned(), path.clone());
                    }
                }
            }
        }

        Registry {
            names,
            declaration_order,
            package_map,
            file_manifest,
            basename_index,
            bundle_deps,
            package_deps,
        }
    }

    /// Look up a canonical path by bare file name.
    pub fn find_file_by_name(&self, name: &str) -> Option<&str> {
        self.basename_index.get(name).map(|s| s.as_str())
    }

    /// Bundle names in declaration order.
    pub fn bundle_names(&self) -> &[String] {
        &self.names
    }

    pub fn contains_bundle(&self, name: &str) -> bool {
        self.declaration_order.contains_key(name)
    }

    pub fn bundle_for_package(&self, package: &str) -> Option<&str> {
        self.package_map.get(package).map(|s| s.as_str())
    }

    pub fn lookup_file(&self, canonical_path: &str) -> Option<&FileExtent> {
        self.file_manifest.get(canonical_path)
    }

    fn declaration_index(&self, name: &str) -> usize {
        self.declaration_order
            .get(name)
            .cloned()
            .unwrap_or(usize::max_value())
    }
}

/// Resolves package identifiers to bundles and materialises bundle
/// contents into an engine filesystem.
pub struct BundleManager {
    base_url: String,
    transport: Arc<dyn Transport>,
    store: Store,
    registry: Mutex<Option<Arc<Registry>>>,
    payloads: Mutex<HashMap<String, Arc<Vec<u8>>>>,
    metas: Mutex<HashMap<String, Arc<BundleMeta>>>,
    in_flight: InFlight,
    bytes_downloaded: AtomicU64,
}

impl BundleManager {
    pub fn new<S: Into<String>>(
        base_url: S,
        transport: Arc<dyn Transport>,
        store: Store,
    ) -> BundleManager {
        BundleManager {
            base_url: base_url.into(),
            transport,
            store,
            registry: Mutex::new(None),
            payloads: Mutex::new(HashMap::new()),
            metas: Mutex::new(HashMap::new()),
            in_flight: InFlight::new(),
            bytes_downloaded: AtomicU64::new(0),
        }
    }

    /// Total bytes this manager has pulled over the network.
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::SeqCst)
    }

    /// Install an already-built registry, bypassing the network. Mostly
    /// useful for tests and offline operation.
    pub fn install_registry(&self, registry: Registry) {
        *self.registry.lock().unwrap() = Some(Arc::new(registry));
    }

    /// Fetch and cache the registry manifests. Idempotent; later calls
    /// return immediately.
    pub fn load_registry(&self, status: &mut dyn StatusBackend) -> Result<()> {
        {
            let loaded = self.registry.lock().unwrap();
            if loaded.is_some() {
                return Ok(());
            }
        }

        let names: Vec<String> = self.required_manifest("registry.json")?;
        let package_map: HashMap<String, String> = self.required_manifest("package-map.json")?;
        let file_manifest: HashMap<String, FileExtent> =
            self.required_manifest("file-manifest.json")?;

        let bundle_deps: HashMap<String, Vec<String>> =
            self.optional_manifest("bundle-deps.json", status);
        let package_deps: HashMap<String, Vec<String>> =
            self.optional_manifest("package-deps.json", status);

        lt_note!(
            status,
            "loaded bundle registry: {} bundles, {} mapped packages",
            names.len(),
            package_map.len()
        );

        let registry = Registry::new(names, package_map, file_manifest, bundle_deps, package_deps);

        let mut loaded = self.registry.lock().unwrap();
        if loaded.is_none() {
            *loaded = Some(Arc::new(registry));
        }

        Ok(())
    }

    fn required_manifest<T: serde::de::DeserializeOwned>(&self, file: &str) -> Result<T> {
        let url = join_url(&self.base_url, file);

        let bytes = match self.transport.get(&url) {
            OpenResult::Ok(b) => b,
            OpenResult::NotAvailable => {
                return Err(ErrorKind::RegistryUnavailable.into());
            }
            OpenResult::Err(e) => {
                return Err(crate::errors::Error::with_chain(
                    e,
                    ErrorKind::RegistryUnavailable,
                ));
            }
        };

        self.bytes_downloaded
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);

        serde_json::from_slice(&bytes)
            .map_err(|e| ErrorKind::Malformed(format!("{}: {}", file, e)).into())
    }

    fn optional_manifest<T: serde::de::DeserializeOwned + Default>(
        &self,
        file: &str,
        status: &mut dyn StatusBackend,
    ) -> T {
        let url = join_url(&self.base_url, file);

        match self.transport.get(&url) {
            OpenResult::Ok(bytes) => {
                self.bytes_downloaded
                    .fetch_add(bytes.len() as u64, Ordering::SeqCst);

                match serde_json::from_slice(&bytes) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        lt_warning!(status, "ignoring malformed manifest {}: {}", file, e);
                        T::default()
                    }
                }
            }
            OpenResult::NotAvailable => T::default(),
            OpenResult::Err(e) => {
                lt_warning!(status, "could not fetch optional manifest {}", file; e);
                T::default()
            }
        }
    }

    pub fn registry(&self) -> Result<Arc<Registry>> {
        match *self.registry.lock().unwrap() {
            Some(ref reg) => Ok(reg.clone()),
            None => Err(ErrorKind::RegistryUnavailable.into()),
        }
    }

    /// Compute the ordered bundle closure for a package set and engine.
    ///
    /// The closure is seeded with the core set and the engine's format
    /// bundles, then grown through the package map and the dependency
    /// graphs. Packages with no mapping are silently ignored; they are
    /// the package fetcher's job at compile time. Dependencies precede
    /// dependents in the returned order; ties break by registry
    /// declaration order.
    pub fn resolve_bundles(&self, packages: &[String], engine: Engine) -> Result<Vec<String>> {
        let registry = self.registry()?;

        let mut closure = Vec::new();
        let mut seen_bundles = HashSet::new();
        let mut seen_packages = HashSet::new();

        for name in CORE_BUNDLES {
            add_bundle(&registry, name, &mut closure, &mut seen_bundles);
        }

        for name in engine_bundles(engine) {
            add_bundle(&registry, name, &mut closure, &mut seen_bundles);
        }

        for package in packages {
            add_package(
                &registry,
                package,
                &mut closure,
                &mut seen_bundles,
                &mut seen_packages,
            );
        }

        Ok(closure)
    }

    /// Load a bundle payload through the three-tier cache. Concurrent
    /// callers for the same name share a single fetch and observe
    /// identical bytes.
    pub fn load_bundle(
        &self,
        name: &str,
        status: &mut dyn StatusBackend,
    ) -> Result<Arc<Vec<u8>>> {
        loop {
            if let Some(payload) = self.payloads.lock().unwrap().get(name) {
                return Ok(payload.clone());
            }

            match self.in_flight.claim(name) {
                Some(_guard) => return self.load_bundle_as_leader(name, status),
                // A leader finished while we waited; re-check the cache.
                // If it failed, the next claim makes us the leader.
                None => continue,
            }
        }
    }

    fn load_bundle_as_leader(
        &self,
        name: &str,
        status: &mut dyn StatusBackend,
    ) -> Result<Arc<Vec<u8>>> {
        let blob_key = bundle_blob_key(name);

        // Tier two: the persistent store holds decompressed payloads.
        match self.store.blobs().read_blob(&blob_key) {
            OpenResult::Ok(bytes) => {
                let payload = Arc::new(bytes);
                self.payloads
                    .lock()
                    .unwrap()
                    .insert(name.to_owned(), payload.clone());
                return Ok(payload);
            }
            OpenResult::NotAvailable => {}
            OpenResult::Err(e) => {
                // Soft: fall through to the network tier.
                lt_warning!(status, "could not read cached bundle \"{}\"", name; e);
            }
        }

        // Tier three: the network.
        let url = join_url(&self.base_url, &format!("{}.data.gz", name));

        let compressed = match self.transport.get(&url) {
            OpenResult::Ok(b) => b,
            OpenResult::NotAvailable => {
                return Err(
                    ErrorKind::Msg(format!("bundle \"{}\" is not served by the registry", name))
                        .into(),
                );
            }
            OpenResult::Err(e) => return Err(e),
        };

        self.bytes_downloaded
            .fetch_add(compressed.len() as u64, Ordering::SeqCst);

        let decompressed = decompress_payload(&compressed)?;

        lt_note!(
            status,
            "downloaded bundle \"{}\" ({} bytes compressed, {} decompressed)",
            name,
            compressed.len(),
            decompressed.len()
        );

        // Fire-and-forget persistence: losing this write loses cache,
        // never correctness.
        if let Err(e) = self.store.blobs().write_blob(&blob_key, &decompressed) {
            lt_warning!(status, "could not persist bundle \"{}\"", name; e);
        }

        let payload = Arc::new(decompressed);
        self.payloads
            .lock()
            .unwrap()
            .insert(name.to_owned(), payload.clone());

        Ok(payload)
    }

    /// Load a bundle's metadata: in-process map, then record store, then
    /// network.
    pub fn load_meta(&self, name: &str, status: &mut dyn StatusBackend) -> Result<Arc<BundleMeta>> {
        if let Some(meta) = self.metas.lock().unwrap().get(name) {
            return Ok(meta.clone());
        }

        let record_key = bundle_meta_key(name);

        if let Some(value) = self.store.records().get_record(&record_key) {
            if let Ok(bytes) = serde_json::to_vec(&value) {
                if let Ok(parsed) = BundleMeta::parse(&bytes) {
                    let meta = Arc::new(parsed);
                    self.metas
                        .lock()
                        .unwrap()
                        .insert(name.to_owned(), meta.clone());
                    return Ok(meta);
                }
            }
        }

        let url = join_url(&self.base_url, &format!("{}.meta.json", name));

        let bytes = match self.transport.get(&url) {
            OpenResult::Ok(b) => b,
            OpenResult::NotAvailable => {
                return Err(ErrorKind::Msg(format!(
                    "bundle \"{}\" has no published metadata",
                    name
                ))
                .into());
            }
            OpenResult::Err(e) => return Err(e),
        };

        self.bytes_downloaded
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);

        let parsed = BundleMeta::parse(&bytes)?;

        if let Ok(value) = serde_json::from_slice(&bytes) {
            if let Err(e) = self.store.records().put_record(&record_key, &value) {
                lt_warning!(status, "could not persist metadata for bundle \"{}\"", name; e);
            }
        }

        let meta = Arc::new(parsed);
        self.metas
            .lock()
            .unwrap()
            .insert(name.to_owned(), meta.clone());

        Ok(meta)
    }

    /// Write every file of `name` into the engine filesystem. Returns
    /// `Ok(false)` when the bundle turned out to be malformed and was
    /// skipped; individual bad entries are skipped without failing the
    /// bundle.
    pub fn mount_bundle(
        &self,
        name: &str,
        fs: &mut dyn EngineFs,
        status: &mut dyn StatusBackend,
    ) -> Result<bool> {
        let meta = match self.load_meta(name, status) {
            Ok(m) => m,
            Err(e) => {
                if let ErrorKind::Malformed(_) = *e.kind() {
                    lt_warning!(status, "skipping malformed bundle \"{}\"", name; e);
                    return Ok(false);
                }
                return Err(e);
            }
        };

        let payload = match self.load_bundle(name, status) {
            Ok(p) => p,
            Err(e) => {
                if let ErrorKind::Malformed(_) = *e.kind() {
                    lt_warning!(status, "skipping malformed bundle \"{}\"", name; e);
                    return Ok(false);
                }
                return Err(e);
            }
        };

        if payload.len() != meta.total_size {
            lt_warning!(
                status,
                "skipping bundle \"{}\": payload is {} bytes but metadata claims {}",
                name,
                payload.len(),
                meta.total_size
            );
            return Ok(false);
        }

        for entry in &meta.files {
            let canonical = entry.canonical_path();

            if !entry.is_canonical() {
                lt_warning!(
                    status,
                    "bundle \"{}\": rejecting malformed path \"{}\"",
                    name,
                    canonical
                );
                continue;
            }

            if let Err(e) = fs.write_file(&canonical, &payload[entry.start..entry.end]) {
                lt_warning!(status, "could not mount \"{}\"", canonical; e);
            }
        }

        Ok(true)
    }

    /// Prefetch metadata and payloads for a whole closure. Loads may
    /// overlap with other sessions' loads; each bundle still travels the
    /// network at most once. Failures are soft: a bundle that cannot be
    /// loaded now will be retried when it is mounted.
    pub fn load_bundles(&self, names: &[String], status: &mut dyn StatusBackend) {
        for name in names {
            if let Err(e) = self.load_meta(name, status) {
                lt_warning!(status, "could not prefetch metadata for \"{}\"", name; e);
                continue;
            }

            if let Err(e) = self.load_bundle(name, status) {
                lt_warning!(status, "could not prefetch bundle \"{}\"", name; e);
            }
        }
    }

    /// Mount a whole closure, in order. Returns how many bundles were
    /// actually mounted; malformed or unreachable bundles are logged and
    /// skipped.
    pub fn mount_bundles(
        &self,
        names: &[String],
        fs: &mut dyn EngineFs,
        status: &mut dyn StatusBackend,
    ) -> usize {
        let mut mounted = 0;

        for name in names {
            match self.mount_bundle(name, fs, status) {
                Ok(true) => mounted += 1,
                Ok(false) => {}
                Err(e) => {
                    lt_warning!(status, "could not mount bundle \"{}\"", name; e);
                }
            }
        }

        mounted
    }

    /// Mount a single file by canonical path, if the file manifest knows
    /// which bundle carries it. Returns `Ok(false)` when the manifest has
    /// no entry.
    pub fn mount_file(
        &self,
        canonical_path: &str,
        fs: &mut dyn EngineFs,
        status: &mut dyn StatusBackend,
    ) -> Result<bool> {
        let registry = self.registry()?;

        let extent = match registry.lookup_file(canonical_path) {
            Some(e) => e.clone(),
            None => return Ok(false),
        };

        let payload = self.load_bundle(&extent.bundle, status)?;

        if extent.end > payload.len() || extent.end < extent.start {
            lt_warning!(
                status,
                "file manifest extent for \"{}\" is out of bounds",
                canonical_path
            );
            return Ok(false);
        }

        fs.write_file(canonical_path, &payload[extent.start..extent.end])?;
        Ok(true)
    }
}

fn add_bundle(
    registry: &Registry,
    name: &str,
    closure: &mut Vec<String>,
    seen: &mut HashSet<String>,
) {
    if !registry.contains_bundle(name) || !seen.insert(name.to_owned()) {
        return;
    }

    let mut deps: Vec<&String> = registry
        .bundle_deps
        .get(name)
        .map(|d| d.iter().collect())
        .unwrap_or_default();
    deps.sort_by_key(|d| registry.declaration_index(d.as_str()));

    for dep in deps {
        add_bundle(registry, dep, closure, seen);
    }

    closure.push(name.to_owned());
}

fn add_package(
    registry: &Registry,
    package: &str,
    closure: &mut Vec<String>,
    seen_bundles: &mut HashSet<String>,
    seen_packages: &mut HashSet<String>,
) {
    if !seen_packages.insert(package.to_owned()) {
        return;
    }

    if let Some(bundle) = registry.bundle_for_package(package) {
        let bundle = bundle.to_owned();
        add_bundle(registry, &bundle, closure, seen_bundles);
    }

    let deps: Vec<String> = registry
        .package_deps
        .get(package)
        .cloned()
        .unwrap_or_default();

    for dep in deps {
        add_package(registry, &dep, closure, seen_bundles, seen_packages);
    }
}
