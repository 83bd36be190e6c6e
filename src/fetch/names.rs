// src/fetch/names.rs -- mapping missing file names to package names
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! Turning a "file not found" name from an engine log into a package name
//! worth asking the repository about.

use regex::Regex;

/// Extensions whose stems name the providing package.
const KNOWN_EXTENSIONS: &[&str] = &[".sty", ".cls", ".def", ".clo", ".fd", ".cfg", ".tex"];

/// Names that will never resolve and should not be looked up.
const SKIP_NAMES: &[&str] = &["document", "texput", "null", "undefined", "NaN"];

lazy_static! {
    // Computer Modern Super font shapes: ecrm1000, tcss0800, and friends.
    static ref CM_SUPER_FONT_RE: Regex = Regex::new(r"^(ec|tc)[a-z]{2}[0-9]+$").unwrap();
    static ref VALID_NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]{2,50}$").unwrap();
}

/// Extract the package likely to provide `missing_file`, or `None` if the
/// name is not worth a repository lookup.
pub fn package_for_missing_file(missing_file: &str) -> Option<String> {
    let base = missing_file.rsplit('/').next().unwrap_or(missing_file);

    let mut stem = base;
    for ext in KNOWN_EXTENSIONS {
        if let Some(candidate) = strip_suffix_ignore_case(base, ext) {
            stem = candidate;
            break;
        }
    }

    if CM_SUPER_FONT_RE.is_match(stem) {
        return Some("cm-super".to_owned());
    }

    if SKIP_NAMES.iter().any(|s| *s == stem) {
        return None;
    }

    if !VALID_NAME_RE.is_match(stem) {
        return None;
    }

    Some(stem.to_owned())
}

fn strip_suffix_ignore_case<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    if name.len() < suffix.len() {
        return None;
    }

    let (stem, tail) = name.split_at(name.len() - suffix.len());
    if tail.eq_ignore_ascii_case(suffix) {
        Some(stem)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_extensions() {
        assert_eq!(
            package_for_missing_file("lingmacros.sty"),
            Some("lingmacros".to_owned())
        );
        assert_eq!(
            package_for_missing_file("beamer.cls"),
            Some("beamer".to_owned())
        );
        assert_eq!(
            package_for_missing_file("ot1.fd"),
            Some("ot1".to_owned())
        );
    }

    #[test]
    fn keeps_unknown_extensions() {
        // "x.png" is not a package-shaped miss; the dot fails validation.
        assert_eq!(package_for_missing_file("figure.png"), None);
    }

    #[test]
    fn cm_super_shapes_resolve_to_cm_super() {
        assert_eq!(
            package_for_missing_file("ecrm1000"),
            Some("cm-super".to_owned())
        );
        assert_eq!(
            package_for_missing_file("tcss0800.tex"),
            Some("cm-super".to_owned())
        );
        // Near misses stay themselves.
        assert_eq!(
            package_for_missing_file("ecosystem"),
            Some("ecosystem".to_owned())
        );
    }

    #[test]
    fn junk_names_are_skipped() {
        assert_eq!(package_for_missing_file("texput.tex"), None);
        assert_eq!(package_for_missing_file("document"), None);
        assert_eq!(package_for_missing_file("null"), None);
        assert_eq!(package_for_missing_file("undefined.sty"), None);
        assert_eq!(package_for_missing_file("x"), None);
        assert_eq!(package_for_missing_file(""), None);

        let long = "a".repeat(51);
        assert_eq!(package_for_missing_file(&long), None);
    }

    #[test]
    fn path_components_are_dropped() {
        assert_eq!(
            package_for_missing_file("/texlive/texmf-dist/tex/latex/lingmacros/lingmacros.sty"),
            Some("lingmacros".to_owned())
        );
    }
}
