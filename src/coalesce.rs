// src/coalesce.rs -- deduplicating concurrent fetches by name
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! At-most-once fetches under concurrent demand.
//!
//! Both the bundle manager and the package fetcher must guarantee that N
//! concurrent requests for the same name hit the network exactly once: the
//! first caller becomes the leader and performs the work, later callers
//! block until the leader finishes and then re-read the now-warm cache.
//! The in-flight entry is cleared on completion, success or failure, so a
//! failed leader's name can be claimed again by the next caller.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct InFlight {
    names: Mutex<HashSet<String>>,
    cond: Condvar,
}

impl InFlight {
    pub fn new() -> InFlight {
        Default::default()
    }

    /// Claim `name`. Returns a guard if this caller is the leader; returns
    /// `None` after blocking until some other leader finished, at which
    /// point the caller should re-check its cache before trying again.
    pub fn claim<'a>(&'a self, name: &str) -> Option<InFlightGuard<'a>> {
        let mut names = self.names.lock().unwrap();

        if names.insert(name.to_owned()) {
            return Some(InFlightGuard {
                owner: self,
                name: name.to_owned(),
            });
        }

        while names.contains(name) {
            names = self.cond.wait(names).unwrap();
        }

        None
    }

    fn release(&self, name: &str) {
        let mut names = self.names.lock().unwrap();
        names.remove(name);
        self.cond.notify_all();
    }
}

/// Clears the in-flight entry when dropped, so a panicking or failing
/// leader never wedges its followers.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    name: String,
}

impl<'a> Drop for InFlightGuard<'a> {
    fn drop(&mut self) {
        self.owner.release(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn leader_runs_once_followers_wait() {
        let inflight = Arc::new(InFlight::new());
        let work_count = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(Mutex::new(Option::<u32>::None));

        let mut handles = Vec::new();

        for _ in 0..4 {
            let inflight = inflight.clone();
            let work_count = work_count.clone();
            let cache = cache.clone();

            handles.push(thread::spawn(move || loop {
                if let Some(v) = *cache.lock().unwrap() {
                    return v;
                }

                if let Some(_guard) = inflight.claim("core") {
                    thread::sleep(Duration::from_millis(20));
                    work_count.fetch_add(1, Ordering::SeqCst);
                    *cache.lock().unwrap() = Some(7);
                    return 7;
                }
            }));
        }

        for h in handles {
            assert_eq!(h.join().unwrap(), 7);
        }

        assert_eq!(work_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_leader_releases_the_name() {
        let inflight = InFlight::new();

        {
            let _guard = inflight.claim("amsmath").unwrap();
            // dropped without populating any cache
        }

        // A later caller can claim the same name again.
        assert!(inflight.claim("amsmath").is_some());
    }
}
