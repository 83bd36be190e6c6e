// src/config.rs -- persistent user configuration
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! User configuration: where bundles and the package proxy live, and where
//! the persistent cache is rooted. Stored as a TOML file in the per-user
//! configuration directory; a default file is written on first use.

use std::fs::File;
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::path::PathBuf;

use app_dirs::{app_root, AppDataType, AppInfo};
use serde::{Deserialize, Serialize};

use crate::ctry;
use crate::errors::{Result, ResultExt};

pub const APP_INFO: AppInfo = AppInfo {
    name: "lazytex",
    author: "Lazytex",
};

const DEFAULT_BUNDLE_URL: &str = "https://bundles.lazytex.org/v1";
const DEFAULT_PROXY_URL: &str = "https://proxy.lazytex.org";

const CONFIG_NAME: &str = "config.toml";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PersistentConfig {
    /// Base URL under which the bundle registry and payloads are served.
    bundle_url: String,

    /// Base URL of the package-repository proxy.
    proxy_url: String,

    /// Overrides the per-user cache directory when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache_dir: Option<PathBuf>,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        PersistentConfig {
            bundle_url: DEFAULT_BUNDLE_URL.to_owned(),
            proxy_url: DEFAULT_PROXY_URL.to_owned(),
            cache_dir: None,
        }
    }
}

impl PersistentConfig {
    /// Open the per-user configuration file, optionally creating it with
    /// default contents if it does not yet exist.
    pub fn open(auto_create: bool) -> Result<PersistentConfig> {
        let mut path = app_root(AppDataType::UserConfig, &APP_INFO)?;
        path.push(CONFIG_NAME);

        match File::open(&path) {
            Ok(mut f) => {
                let mut text = String::new();
                f.read_to_string(&mut text)?;
                let config: PersistentConfig =
                    ctry!(toml::from_str(&text); "failed to parse {}", path.display());
                Ok(config)
            }

            Err(ref e) if e.kind() == IoErrorKind::NotFound && auto_create => {
                let config = PersistentConfig::default();
                let text = toml::to_string(&config)?;
                let mut f = File::create(&path)?;
                f.write_all(text.as_bytes())?;
                Ok(config)
            }

            Err(ref e) if e.kind() == IoErrorKind::NotFound => {
                Ok(PersistentConfig::default())
            }

            Err(e) => Err(e.into()),
        }
    }

    pub fn bundle_url(&self) -> &str {
        &self.bundle_url
    }

    pub fn proxy_url(&self) -> &str {
        &self.proxy_url
    }

    pub fn set_bundle_url<S: Into<String>>(&mut self, url: S) {
        self.bundle_url = url.into();
    }

    pub fn set_proxy_url<S: Into<String>>(&mut self, url: S) {
        self.proxy_url = url.into();
    }

    /// The root directory of the persistent store: the configured override
    /// if there is one, else the per-user cache directory.
    pub fn cache_root(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }

        Ok(app_root(AppDataType::UserCache, &APP_INFO)?)
    }
}
