// tests/fetcher.rs -- fetcher persistence across sessions
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! What survives a worker restart: package records, negative outcomes,
//! and the alias table all live in the store, so a fresh fetcher over the
//! same store must behave as if it had done the work itself.

mod util;

use std::sync::Arc;

use lazytex::fetch::PackageFetcher;
use lazytex::status::NoopStatusBackend;
use lazytex::store::Store;

use util::{RepoFixture, PROXY_URL};

fn fetcher(fixture: &RepoFixture, store: &Store) -> PackageFetcher {
    PackageFetcher::new(PROXY_URL, fixture.transport.clone(), store.clone())
}

#[test]
fn package_records_survive_a_new_fetcher() {
    let mut fixture = RepoFixture::new();
    fixture.add_proxy_package(
        "lingmacros",
        &[(
            "/texlive/texmf-dist/tex/latex/lingmacros/lingmacros.sty",
            "% lingmacros",
        )],
        &[],
    );

    let store = Store::new_memory();
    let mut status = NoopStatusBackend::new();

    let first = fetcher(&fixture, &store);
    assert!(first.fetch_package("lingmacros", &mut status).is_some());

    // A fresh fetcher over the same store serves the package without
    // touching the network.
    let second = fetcher(&fixture, &store);
    let fetched = second.fetch_package("lingmacros", &mut status).unwrap();
    assert_eq!(fetched.files.len(), 1);

    assert_eq!(
        fixture
            .transport
            .hits(&format!("{}/api/fetch/lingmacros", PROXY_URL)),
        1
    );
}

#[test]
fn negative_outcomes_survive_a_new_fetcher() {
    let fixture = RepoFixture::new();
    let store = Store::new_memory();
    let mut status = NoopStatusBackend::new();

    let first = fetcher(&fixture, &store);
    assert!(first.fetch_package("no-such-package", &mut status).is_none());

    let second = fetcher(&fixture, &store);
    assert!(second.fetch_package("no-such-package", &mut status).is_none());

    assert_eq!(
        fixture
            .transport
            .hits(&format!("{}/api/fetch/no-such-package", PROXY_URL)),
        1
    );
}

#[test]
fn aliases_survive_a_new_fetcher() {
    let mut fixture = RepoFixture::new();

    // `etex` is served by the repository as part of `etex-pkg`.
    fixture.transport.insert(
        format!("{}/api/pkg/etex", PROXY_URL),
        br#"{"name": "etex", "miktex": "etex-pkg"}"#.to_vec(),
    );
    fixture.add_proxy_package(
        "etex-pkg",
        &[(
            "/texlive/texmf-dist/tex/latex/etex-pkg/etex.sty",
            "% etex",
        )],
        &[],
    );

    let store = Store::new_memory();
    let mut status = NoopStatusBackend::new();

    let first = fetcher(&fixture, &store);
    assert!(first.fetch_package("etex", &mut status).is_some());

    let second = fetcher(&fixture, &store);
    assert_eq!(second.resolve_alias("etex").unwrap(), "etex-pkg");
    assert!(second.fetch_package("etex", &mut status).is_some());

    assert_eq!(
        fixture.transport.hits(&format!("{}/api/fetch/etex", PROXY_URL)),
        1
    );
    assert_eq!(
        fixture
            .transport
            .hits(&format!("{}/api/fetch/etex-pkg", PROXY_URL)),
        1
    );
}

#[test]
fn reset_forgets_everything() {
    let mut fixture = RepoFixture::new();
    fixture.add_proxy_package(
        "lingmacros",
        &[(
            "/texlive/texmf-dist/tex/latex/lingmacros/lingmacros.sty",
            "% lingmacros",
        )],
        &[],
    );

    let store = Store::new_memory();
    let mut status = NoopStatusBackend::new();

    let f = fetcher(&fixture, &store);
    assert!(f.fetch_package("lingmacros", &mut status).is_some());

    store.reset().unwrap();

    // After a total reset the fetcher has to go back to the network.
    let fresh = fetcher(&fixture, &store);
    assert!(fresh.fetch_package("lingmacros", &mut status).is_some());
    assert_eq!(
        fixture
            .transport
            .hits(&format!("{}/api/fetch/lingmacros", PROXY_URL)),
        2
    );
}
