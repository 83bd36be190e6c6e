// src/select/fingerprint.rs -- stable preamble fingerprints
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! Keys for learned compile statistics.
//!
//! Two documents with the same preamble — up to comments and whitespace —
//! behave the same way under an engine, so statistics are keyed by a
//! 32-bit hash of the normalised preamble, rendered in radix 36 with a
//! `p_` prefix.

use crate::scan::strip_comments;

const PREAMBLE_FALLBACK_LEN: usize = 2000;

/// The preamble: everything before `\begin{document}`, or the first 2000
/// characters when the marker is absent.
pub fn preamble_of(source: &str) -> &str {
    match source.find("\\begin{document}") {
        Some(idx) => &source[..idx],
        None => {
            let mut end = source.len().min(PREAMBLE_FALLBACK_LEN);
            while !source.is_char_boundary(end) {
                end -= 1;
            }
            &source[..end]
        }
    }
}

/// Strip comments and collapse whitespace runs to single spaces.
fn normalise(preamble: &str) -> String {
    let stripped = strip_comments(preamble);
    let mut out = String::with_capacity(stripped.len());
    let mut in_whitespace = false;

    for c in stripped.chars() {
        if c.is_whitespace() {
            if !in_whitespace && !out.is_empty() {
                out.push(' ');
            }
            in_whitespace = true;
        } else {
            out.push(c);
            in_whitespace = false;
        }
    }

    while out.ends_with(' ') {
        out.pop();
    }

    out
}

fn djb2(text: &str) -> u32 {
    let mut hash: u32 = 5381;

    for byte in text.bytes() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(u32::from(byte));
    }

    hash
}

fn to_radix36(mut value: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_owned();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }

    out.reverse();
    String::from_utf8(out).expect("radix-36 digits are ASCII")
}

/// The statistics key for a document.
pub fn fingerprint(source: &str) -> String {
    format!("p_{}", to_radix36(djb2(&normalise(preamble_of(source)))))
}
