// src/net.rs -- network transport for bundles and the package proxy
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! The single seam through which the crate touches the network.
//!
//! A [`Transport`] is a blocking HTTP GET that distinguishes a definite
//! 404 from a transport-level failure; callers decide which of the two may
//! be cached negatively. Tests substitute in-process fakes.

use std::io::Read;
use std::time::Duration;

use crate::errors::ErrorKind;
use crate::io::OpenResult;

pub trait Transport: Send + Sync {
    /// Fetch `url`. `NotAvailable` means the server definitively said the
    /// resource does not exist; `Err` means we could not find out.
    fn get(&self, url: &str) -> OpenResult<Vec<u8>>;
}

/// The production transport, backed by a blocking reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> crate::errors::Result<ReqwestTransport> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(ReqwestTransport { client })
    }
}

impl Transport for ReqwestTransport {
    fn get(&self, url: &str) -> OpenResult<Vec<u8>> {
        let mut resp = match self.client.get(url).send() {
            Ok(r) => r,
            Err(e) => return OpenResult::Err(e.into()),
        };

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return OpenResult::NotAvailable;
        }

        if !resp.status().is_success() {
            return OpenResult::Err(
                ErrorKind::Msg(format!("GET {} returned status {}", url, resp.status())).into(),
            );
        }

        let mut bytes = Vec::new();
        if let Err(e) = resp.read_to_end(&mut bytes) {
            return OpenResult::Err(e.into());
        }

        OpenResult::Ok(bytes)
    }
}

/// Join a base URL and a relative component without doubling slashes.
pub fn join_url(base: &str, rest: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), rest.trim_start_matches('/'))
}

// Helpers for testing. FIXME: would be nicer conditionally compiled, but
// integration tests need these too.

pub mod testing {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use super::Transport;
    use crate::errors::ErrorKind;
    use crate::io::OpenResult;

    /// A transport for code paths that must not touch the network.
    pub struct NeverTransport;

    impl Transport for NeverTransport {
        fn get(&self, url: &str) -> OpenResult<Vec<u8>> {
            OpenResult::Err(
                ErrorKind::Msg(format!("unexpected network access: {}", url)).into(),
            )
        }
    }

    /// Serves canned responses, counts hits per URL, and can simulate
    /// slow links and transport failures.
    #[derive(Default)]
    pub struct MapTransport {
        routes: Mutex<HashMap<String, Vec<u8>>>,
        failing: Mutex<HashSet<String>>,
        hits: Mutex<HashMap<String, usize>>,
        delay: Mutex<Option<Duration>>,
    }

    impl MapTransport {
        pub fn new() -> MapTransport {
            Default::default()
        }

        pub fn insert<U: Into<String>>(&self, url: U, bytes: Vec<u8>) {
            self.routes.lock().unwrap().insert(url.into(), bytes);
        }

        /// Make `url` fail at the transport level (as opposed to a 404).
        pub fn fail<U: Into<String>>(&self, url: U) {
            self.failing.lock().unwrap().insert(url.into());
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn hits(&self, url: &str) -> usize {
            self.hits.lock().unwrap().get(url).cloned().unwrap_or(0)
        }

        pub fn hits_matching(&self, fragment: &str) -> usize {
            self.hits
                .lock()
                .unwrap()
                .iter()
                .filter(|(url, _)| url.contains(fragment))
                .map(|(_, n)| n)
                .sum()
        }
    }

    impl Transport for MapTransport {
        fn get(&self, url: &str) -> OpenResult<Vec<u8>> {
            *self.hits.lock().unwrap().entry(url.to_owned()).or_insert(0) += 1;

            let delay = *self.delay.lock().unwrap();
            if let Some(d) = delay {
                thread::sleep(d);
            }

            if self.failing.lock().unwrap().contains(url) {
                return OpenResult::Err(
                    ErrorKind::Msg(format!("simulated transport failure: {}", url)).into(),
                );
            }

            match self.routes.lock().unwrap().get(url) {
                Some(bytes) => OpenResult::Ok(bytes.clone()),
                None => OpenResult::NotAvailable,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(join_url("https://x.org/v1/", "/a.json"), "https://x.org/v1/a.json");
        assert_eq!(join_url("https://x.org/v1", "a.json"), "https://x.org/v1/a.json");
    }
}
