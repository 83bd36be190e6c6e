// src/bundles/meta.rs -- bundle metadata and payload formats
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! The on-the-wire bundle formats.
//!
//! A bundle payload is a gzip stream whose decompressed bytes are the
//! concatenation, in metadata order, of every member file — no framing,
//! no per-file headers. The metadata (`<name>.meta.json`) indexes the
//! payload by byte extents. Anything that violates the extent invariants
//! is malformed and the whole bundle is skipped; an individual entry whose
//! canonical path escapes the TeX root is rejected on its own.

use std::io::Read;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, Result};
use crate::io::is_canonical_path;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BundleFileEntry {
    /// Directory part of the canonical path.
    pub path: String,

    /// File name within the directory.
    pub name: String,

    /// Byte offset of the first byte in the decompressed payload.
    pub start: usize,

    /// Byte offset one past the last byte.
    pub end: usize,
}

impl BundleFileEntry {
    pub fn canonical_path(&self) -> String {
        format!("{}/{}", self.path.trim_end_matches('/'), self.name)
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_canonical(&self) -> bool {
        is_canonical_path(&self.canonical_path())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BundleMeta {
    pub name: String,

    pub files: Vec<BundleFileEntry>,

    #[serde(rename = "totalSize")]
    pub total_size: usize,
}

impl BundleMeta {
    pub fn parse(bytes: &[u8]) -> Result<BundleMeta> {
        let meta: BundleMeta = serde_json::from_slice(bytes)
            .map_err(|e| ErrorKind::Malformed(format!("bundle metadata: {}", e)))?;
        meta.validate()?;
        Ok(meta)
    }

    /// Check the extent invariants: sorted by start, non-overlapping,
    /// within bounds, and jointly covering the payload.
    pub fn validate(&self) -> Result<()> {
        let mut covered = 0usize;
        let mut previous_end = 0usize;

        for entry in &self.files {
            if entry.end < entry.start {
                return Err(malformed(&self.name, "extent ends before it starts"));
            }

            if entry.start < previous_end {
                return Err(malformed(&self.name, "extents overlap or are unsorted"));
            }

            if entry.end > self.total_size {
                return Err(malformed(&self.name, "extent runs past the payload"));
            }

            covered += entry.len();
            previous_end = entry.end;
        }

        if covered != self.total_size {
            return Err(malformed(
                &self.name,
                "extents do not cover the whole payload",
            ));
        }

        Ok(())
    }
}

fn malformed(bundle: &str, detail: &str) -> crate::errors::Error {
    ErrorKind::Malformed(format!("bundle \"{}\": {}", bundle, detail)).into()
}

/// Decompress a bundle payload. Only gzip is supported; an LZ4 frame is
/// recognised by magic and reported as malformed rather than mistaken for
/// corruption.
pub fn decompress_payload(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.len() >= 4 && bytes[..4] == LZ4_FRAME_MAGIC {
        return Err(ErrorKind::Malformed(
            "bundle payload uses the unsupported LZ4 frame format".to_owned(),
        )
        .into());
    }

    if bytes.len() < 2 || bytes[..2] != GZIP_MAGIC {
        return Err(ErrorKind::Malformed(
            "bundle payload is not a gzip stream".to_owned(),
        )
        .into());
    }

    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ErrorKind::Malformed(format!("gzip payload: {}", e)))?;

    Ok(out)
}
