// tests/util/mod.rs -- shared fixtures for the integration tests
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! Helpers shared across integration tests: an in-process bundle
//! repository served through the fake transport, and a scripted engine
//! that fails until the tree holds the files it wants.

#![allow(dead_code)]

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Map, Value};

use lazytex::engines::{EngineExit, TexEngine};
use lazytex::errors::Result;
use lazytex::io::EngineFs;
use lazytex::net::testing::MapTransport;
use lazytex::status::StatusBackend;

pub const BASE_URL: &str = "https://bundles.test/v1";
pub const PROXY_URL: &str = "https://proxy.test";

pub fn gz(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// An in-process bundle repository plus package proxy, assembled route by
/// route and then served through a counting [`MapTransport`].
pub struct RepoFixture {
    pub transport: Arc<MapTransport>,
    bundle_names: Vec<String>,
    package_map: Map<String, Value>,
    file_manifest: Map<String, Value>,
    bundle_deps: Map<String, Value>,
    package_deps: Map<String, Value>,
}

impl RepoFixture {
    pub fn new() -> RepoFixture {
        RepoFixture {
            transport: Arc::new(MapTransport::new()),
            bundle_names: Vec::new(),
            package_map: Map::new(),
            file_manifest: Map::new(),
            bundle_deps: Map::new(),
            package_deps: Map::new(),
        }
    }

    /// The seed bundles every closure pulls in, plus a few mapped
    /// packages, mirroring a miniature distribution.
    pub fn standard() -> RepoFixture {
        let mut fixture = RepoFixture::new();

        fixture.add_bundle(
            "core",
            &[("/texlive/texmf-dist/tex/plain/base/plain.tex", "% plain")],
        );
        fixture.add_bundle(
            "latex-base",
            &[
                ("/texlive/texmf-dist/tex/latex/base/article.cls", "% article"),
                ("/texlive/texmf-dist/tex/latex/base/size10.clo", "% size10"),
            ],
        );
        fixture.add_bundle(
            "l3",
            &[("/texlive/texmf-dist/tex/latex/l3kernel/expl3.sty", "% expl3")],
        );
        fixture.add_bundle(
            "graphics",
            &[("/texlive/texmf-dist/tex/latex/graphics/graphicx.sty", "% graphicx")],
        );
        fixture.add_bundle(
            "tools",
            &[("/texlive/texmf-dist/tex/latex/tools/longtable.sty", "% longtable")],
        );
        fixture.add_bundle(
            "fmt-pdflatex",
            &[("/texlive/texmf-var/fmt/pdflatex.fmt", "pdflatex format")],
        );
        fixture.add_bundle(
            "fmt-xelatex",
            &[("/texlive/texmf-var/fmt/xelatex.fmt", "xelatex format")],
        );
        fixture.add_bundle(
            "fmt-lualatex",
            &[("/texlive/texmf-var/fmt/lualatex.fmt", "lualatex format")],
        );
        fixture.add_bundle(
            "fonts-cm",
            &[("/texlive/texmf-dist/fonts/tfm/public/cm/cmr10.tfm", "cmr10")],
        );
        fixture.add_bundle(
            "amsfonts",
            &[("/texlive/texmf-dist/fonts/tfm/public/amsfonts/msam10.tfm", "msam10")],
        );
        fixture.add_bundle(
            "fontspec",
            &[("/texlive/texmf-dist/tex/latex/fontspec/fontspec.sty", "% fontspec")],
        );
        fixture.add_bundle(
            "unicode-math",
            &[("/texlive/texmf-dist/tex/latex/unicode-math/unicode-math.sty", "% um")],
        );
        fixture.add_bundle(
            "amsmath",
            &[("/texlive/texmf-dist/tex/latex/amsmath/amsmath.sty", "% amsmath")],
        );

        fixture.map_package("article", "latex-base");
        fixture.map_package("amsmath", "amsmath");
        fixture.map_package("fontspec", "fontspec");
        fixture.map_package("unicode-math", "unicode-math");
        fixture.map_package("graphicx", "graphics");
        fixture.map_package("longtable", "tools");

        fixture.bundle_dep("amsmath", "amsfonts");

        fixture
    }

    /// Add a bundle built from `(canonical path, contents)` pairs and
    /// serve its payload and metadata.
    pub fn add_bundle(&mut self, name: &str, files: &[(&str, &str)]) {
        let mut payload = Vec::new();
        let mut entries = Vec::new();

        for (path, contents) in files {
            let start = payload.len();
            payload.extend_from_slice(contents.as_bytes());
            let end = payload.len();

            let slash = path.rfind('/').expect("canonical paths contain slashes");
            let (dir, base) = (&path[..slash], &path[slash + 1..]);

            entries.push(json!({
                "path": dir,
                "name": base,
                "start": start,
                "end": end,
            }));

            self.file_manifest.insert(
                (*path).to_owned(),
                json!({"bundle": name, "start": start, "end": end}),
            );
        }

        let meta = json!({
            "name": name,
            "files": entries,
            "totalSize": payload.len(),
        });

        self.transport.insert(
            format!("{}/{}.data.gz", BASE_URL, name),
            gz(&payload),
        );
        self.transport.insert(
            format!("{}/{}.meta.json", BASE_URL, name),
            meta.to_string().into_bytes(),
        );

        self.bundle_names.push(name.to_owned());
    }

    /// Serve raw (possibly bogus) payload and metadata for a bundle name.
    pub fn add_raw_bundle(&mut self, name: &str, payload: Vec<u8>, meta: Value) {
        self.transport
            .insert(format!("{}/{}.data.gz", BASE_URL, name), payload);
        self.transport.insert(
            format!("{}/{}.meta.json", BASE_URL, name),
            meta.to_string().into_bytes(),
        );
        self.bundle_names.push(name.to_owned());
    }

    pub fn map_package(&mut self, package: &str, bundle: &str) {
        self.package_map
            .insert(package.to_owned(), Value::String(bundle.to_owned()));
    }

    pub fn bundle_dep(&mut self, bundle: &str, dep: &str) {
        let deps = self
            .bundle_deps
            .entry(bundle.to_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        deps.as_array_mut()
            .unwrap()
            .push(Value::String(dep.to_owned()));
    }

    pub fn package_dep(&mut self, package: &str, dep: &str) {
        let deps = self
            .package_deps
            .entry(package.to_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        deps.as_array_mut()
            .unwrap()
            .push(Value::String(dep.to_owned()));
    }

    /// Serve a package from the proxy, built from `(canonical path,
    /// contents)` pairs.
    pub fn add_proxy_package(&mut self, name: &str, files: &[(&str, &str)], deps: &[&str]) {
        let mut file_map = Map::new();

        for (path, contents) in files {
            file_map.insert(
                (*path).to_owned(),
                json!({"path": path, "content": contents}),
            );
        }

        let body = json!({
            "name": name,
            "files": Value::Object(file_map),
            "dependencies": deps,
            "totalFiles": files.len(),
        });

        self.transport.insert(
            format!("{}/api/fetch/{}", PROXY_URL, name),
            body.to_string().into_bytes(),
        );
    }

    /// Publish the registry manifests. Call after the last `add_bundle`.
    pub fn finish(&self) {
        self.transport.insert(
            format!("{}/registry.json", BASE_URL),
            serde_json::to_vec(&self.bundle_names).unwrap(),
        );
        self.transport.insert(
            format!("{}/package-map.json", BASE_URL),
            Value::Object(self.package_map.clone()).to_string().into_bytes(),
        );
        self.transport.insert(
            format!("{}/file-manifest.json", BASE_URL),
            Value::Object(self.file_manifest.clone()).to_string().into_bytes(),
        );
        self.transport.insert(
            format!("{}/bundle-deps.json", BASE_URL),
            Value::Object(self.bundle_deps.clone()).to_string().into_bytes(),
        );
        self.transport.insert(
            format!("{}/package-deps.json", BASE_URL),
            Value::Object(self.package_deps.clone()).to_string().into_bytes(),
        );
    }
}

/// An engine stand-in: it demands a fixed set of canonical paths, failing
/// with a realistic missing-file log line for the first absent one, and
/// writes the PDF artifact once satisfied.
pub struct ScriptedEngine {
    required: Vec<String>,
    runs: Arc<AtomicU32>,
}

impl ScriptedEngine {
    pub fn new(required: &[&str]) -> ScriptedEngine {
        ScriptedEngine {
            required: required.iter().map(|s| s.to_string()).collect(),
            runs: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A handle to the run counter that stays valid after the engine is
    /// boxed into a session.
    pub fn runs_handle(&self) -> Arc<AtomicU32> {
        self.runs.clone()
    }
}

impl TexEngine for ScriptedEngine {
    fn run(
        &mut self,
        fs: &mut dyn EngineFs,
        argv: &[String],
        _status: &mut dyn StatusBackend,
    ) -> Result<EngineExit> {
        self.runs.fetch_add(1, Ordering::SeqCst);

        let main = argv.last().expect("argv carries the main file");

        if fs.read_file(main).is_not_available() {
            return Ok(EngineExit {
                code: 1,
                log: format!("! I can't find file `{}'.\n", main),
            });
        }

        for path in &self.required {
            if fs.read_file(path).is_not_available() {
                let base = path.rsplit('/').next().unwrap();
                return Ok(EngineExit {
                    code: 1,
                    log: format!(
                        "This is a TeX engine\n! LaTeX Error: File `{}' not found.\n\nType X to quit.\n",
                        base
                    ),
                });
            }
        }

        let stem = main.rfind('.').map(|i| &main[..i]).unwrap_or(main);
        let artifact = format!("{}.pdf", stem);
        fs.write_file(&artifact, b"%PDF-1.5\nfake but non-empty\n%%EOF\n")?;

        Ok(EngineExit {
            code: 0,
            log: format!("Output written on {} (1 page).\n", artifact),
        })
    }
}
