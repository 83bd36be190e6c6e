// src/select/mod.rs -- choosing a TeX engine for a document
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! The engine selector.
//!
//! Given document source, decide between pdflatex, xelatex, and lualatex.
//! Hard requirements (packages, commands, scripts that only one engine can
//! handle) always win; otherwise the selector consults statistics learned
//! from earlier compiles of documents with the same preamble fingerprint,
//! then falls back through soft preferences to the pdflatex default.

pub mod fingerprint;

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::engines::{Engine, ALL_ENGINES};
use crate::scan::{scan_packages, strip_comments};
use crate::status::StatusBackend;
use crate::store::{flag_record_key, stats_record_key, Store};
use crate::lt_warning;

/// Learned from a failed pdflatex run whose log shows the legacy
/// font-expansion error.
pub const LEGACY_FONT_EXPANSION_FLAG: &str = "triggers-legacy-font-expansion";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Clone, Debug)]
pub struct EngineChoice {
    pub engine: Engine,
    pub reason: String,
    pub confidence: Confidence,
}

/// One engine's learned statistics for one preamble fingerprint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EngineStat {
    pub engine: String,
    pub compile_count: u32,
    pub running_avg_ms: f64,
    pub running_success_rate: f64,
    pub last_used_ms: u64,
}

/// The outcome of one compile, as reported by the orchestrator.
#[derive(Clone, Debug)]
pub struct CompileRecord {
    pub engine: Engine,
    pub success: bool,
    pub time_ms: u64,
    pub triggered_legacy_font_expansion: bool,
}

const XELATEX_PACKAGES: &[&str] = &[
    "fontspec",
    "unicode-math",
    "polyglossia",
    "xeCJK",
    "xunicode",
    "xltxtra",
    "mathspec",
    "realscripts",
    "metalogo",
    "xetex",
];

const LUALATEX_PACKAGES: &[&str] = &["luacode", "luatexbase", "luaotfload", "luamplib", "luatextra"];

/// Packages whose documents tend to fare better under xelatex even though
/// pdflatex could compile them.
const SOFT_XELATEX_PACKAGES: &[&str] = &[
    "geometry",
    "fancyhdr",
    "titlesec",
    "enumitem",
    "babel",
    "inputenc",
    "fontenc",
];

lazy_static! {
    static ref XELATEX_COMMAND_RE: Regex = Regex::new(
        r"\\(setmainfont|setsansfont|setmonofont|newfontfamily|setmathfont|defaultfontfeatures)\b"
    )
    .unwrap();
    static ref LUALATEX_COMMAND_RE: Regex =
        Regex::new(r"\\(directlua|luaexec|luadirect)\b").unwrap();
}

/// Unicode blocks that demand a Unicode-capable engine: Arabic,
/// Devanagari, Thai, CJK, Hangul.
fn contains_unicode_script(source: &str) -> bool {
    source.chars().any(|c| {
        let cp = c as u32;
        (0x0600..=0x06ff).contains(&cp)
            || (0x0900..=0x097f).contains(&cp)
            || (0x0e00..=0x0e7f).contains(&cp)
            || (0x3000..=0x9fff).contains(&cp)
            || (0xac00..=0xd7af).contains(&cp)
    })
}

pub struct EngineSelector {
    store: Store,
}

impl EngineSelector {
    pub fn new(store: Store) -> EngineSelector {
        EngineSelector { store }
    }

    /// Choose the engine for `source`. Decision order: hard requirements,
    /// historical best, avoidance of known-failing engines, learned
    /// flags, soft preferences, pdflatex.
    pub fn choose(&self, source: &str) -> EngineChoice {
        let stripped = strip_comments(source);
        let packages = scan_packages(source);

        if let Some(choice) = hard_requirement(&stripped, &packages) {
            return choice;
        }

        let fp = fingerprint::fingerprint(source);
        let stats = self.stats_for(&fp);

        // Historical best: a proven engine beats every heuristic below.
        let best = stats
            .iter()
            .filter(|s| s.compile_count >= 2 && s.running_success_rate > 0.5)
            .min_by(|a, b| {
                a.running_avg_ms
                    .partial_cmp(&b.running_avg_ms)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        if let Some(stat) = best {
            if let Ok(engine) = stat.engine.parse::<Engine>() {
                return EngineChoice {
                    engine,
                    reason: format!(
                        "fastest engine over {} past compiles ({:.0} ms average)",
                        stat.compile_count, stat.running_avg_ms
                    ),
                    confidence: Confidence::High,
                };
            }
        }

        // Avoidance: everything we have tried keeps failing, so try
        // something we have not.
        if !stats.is_empty()
            && stats.iter().all(|s| s.running_success_rate <= 0.5)
        {
            let failed: HashSet<Engine> = stats
                .iter()
                .filter_map(|s| s.engine.parse().ok())
                .collect();

            if let Some(&engine) = ALL_ENGINES.iter().find(|e| !failed.contains(*e)) {
                return EngineChoice {
                    engine,
                    reason: "every engine tried so far has a poor success rate".to_owned(),
                    confidence: Confidence::Medium,
                };
            }
        }

        if self.flag(&fp, LEGACY_FONT_EXPANSION_FLAG) {
            return EngineChoice {
                engine: Engine::Xelatex,
                reason: "pdflatex previously hit legacy font expansion on this preamble"
                    .to_owned(),
                confidence: Confidence::High,
            };
        }

        if let Some(pkg) = packages
            .iter()
            .find(|p| SOFT_XELATEX_PACKAGES.contains(&p.as_str()))
        {
            return EngineChoice {
                engine: Engine::Xelatex,
                reason: format!("package {} tends to fare better under xelatex", pkg),
                confidence: Confidence::Medium,
            };
        }

        EngineChoice {
            engine: Engine::Pdflatex,
            reason: "no engine-specific demands detected".to_owned(),
            confidence: Confidence::Low,
        }
    }

    /// Fold one compile outcome into the statistics for this preamble.
    pub fn record_result(
        &self,
        source: &str,
        record: &CompileRecord,
        status: &mut dyn StatusBackend,
    ) {
        let fp = fingerprint::fingerprint(source);
        let mut stats = self.stats_for(&fp);

        let engine_name = record.engine.as_str();

        if !stats.iter().any(|s| s.engine == engine_name) {
            stats.push(EngineStat {
                engine: engine_name.to_owned(),
                compile_count: 0,
                running_avg_ms: 0.0,
                running_success_rate: 0.0,
                last_used_ms: 0,
            });
        }

        for stat in stats.iter_mut().filter(|s| s.engine == engine_name) {
            let n = f64::from(stat.compile_count) + 1.0;
            stat.running_avg_ms += (record.time_ms as f64 - stat.running_avg_ms) / n;

            let success = if record.success { 1.0 } else { 0.0 };
            stat.running_success_rate += (success - stat.running_success_rate) / n;

            stat.compile_count += 1;
            stat.last_used_ms = now_ms();
        }

        match serde_json::to_value(&stats) {
            Ok(value) => {
                if let Err(e) = self.store.records().put_record(&stats_record_key(&fp), &value) {
                    lt_warning!(status, "could not persist engine statistics"; e);
                }
            }
            Err(_) => {}
        }

        if record.triggered_legacy_font_expansion && record.engine == Engine::Pdflatex {
            let key = flag_record_key(&fp, LEGACY_FONT_EXPANSION_FLAG);
            if let Err(e) = self
                .store
                .records()
                .put_record(&key, &serde_json::Value::Bool(true))
            {
                lt_warning!(status, "could not persist the font-expansion flag"; e);
            }
        }
    }

    fn stats_for(&self, fp: &str) -> Vec<EngineStat> {
        self.store
            .records()
            .get_record(&stats_record_key(fp))
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn flag(&self, fp: &str, name: &str) -> bool {
        self.store
            .records()
            .get_record(&flag_record_key(fp, name))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

fn hard_requirement(stripped: &str, packages: &[String]) -> Option<EngineChoice> {
    if let Some(pkg) = packages
        .iter()
        .find(|p| XELATEX_PACKAGES.contains(&p.as_str()))
    {
        return Some(EngineChoice {
            engine: Engine::Xelatex,
            reason: format!("package {} requires xelatex", pkg),
            confidence: Confidence::High,
        });
    }

    if let Some(m) = XELATEX_COMMAND_RE.find(stripped) {
        return Some(EngineChoice {
            engine: Engine::Xelatex,
            reason: format!("command {} requires xelatex", m.as_str()),
            confidence: Confidence::High,
        });
    }

    if let Some(pkg) = packages
        .iter()
        .find(|p| LUALATEX_PACKAGES.contains(&p.as_str()))
    {
        return Some(EngineChoice {
            engine: Engine::Lualatex,
            reason: format!("package {} requires lualatex", pkg),
            confidence: Confidence::High,
        });
    }

    if let Some(m) = LUALATEX_COMMAND_RE.find(stripped) {
        return Some(EngineChoice {
            engine: Engine::Lualatex,
            reason: format!("command {} requires lualatex", m.as_str()),
            confidence: Confidence::High,
        });
    }

    if contains_unicode_script(stripped) {
        return Some(EngineChoice {
            engine: Engine::Xelatex,
            reason: "the document uses a script pdflatex cannot shape".to_owned(),
            confidence: Confidence::High,
        });
    }

    None
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
