// src/scan.rs -- extracting package demands from document source
// Copyright 2019-2021 the Lazytex Project
// Licensed under the MIT License.

//! Lightweight scanning of LaTeX source.
//!
//! This is not a TeX parser. Three regexes pull package identifiers out of
//! `\usepackage`, `\RequirePackage`, and `\documentclass`; the document
//! class is treated as a package. A separate check decides whether the
//! source demands a Unicode-capable engine.

use regex::Regex;

lazy_static! {
    static ref USEPACKAGE_RE: Regex =
        Regex::new(r"\\usepackage\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap();
    static ref REQUIREPACKAGE_RE: Regex =
        Regex::new(r"\\RequirePackage\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap();
    static ref DOCUMENTCLASS_RE: Regex =
        Regex::new(r"\\documentclass\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").unwrap();
    static ref SETFONT_RE: Regex =
        Regex::new(r"\\(setmainfont|setsansfont|setmonofont)\b").unwrap();
}

/// Strip `%` line comments. A `\%` is an escaped percent sign, not a
/// comment starter.
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());

    for line in source.lines() {
        let mut previous = '\0';
        let mut kept = line;

        for (idx, c) in line.char_indices() {
            if c == '%' && previous != '\\' {
                kept = &line[..idx];
                break;
            }
            previous = c;
        }

        out.push_str(kept);
        out.push('\n');
    }

    out
}

/// Extract the packages a document asks for, in first-mention order,
/// without duplicates.
pub fn scan_packages(source: &str) -> Vec<String> {
    let stripped = strip_comments(source);
    let mut packages = Vec::new();

    for re in &[&*DOCUMENTCLASS_RE, &*USEPACKAGE_RE, &*REQUIREPACKAGE_RE] {
        for captures in re.captures_iter(&stripped) {
            for name in captures[1].split(',') {
                let name = name.trim();
                if !name.is_empty() && !packages.iter().any(|p| p == name) {
                    packages.push(name.to_owned());
                }
            }
        }
    }

    packages
}

/// True when the source cannot compile on a legacy 8-bit engine: it loads
/// fontspec or unicode-math, or uses the font-selection commands those
/// packages define.
pub fn requires_unicode_engine(source: &str) -> bool {
    let stripped = strip_comments(source);

    if scan_packages(&stripped)
        .iter()
        .any(|p| p == "fontspec" || p == "unicode-math")
    {
        return true;
    }

    SETFONT_RE.is_match(&stripped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packages_from_all_three_commands() {
        let source = r"\documentclass[11pt]{article}
\usepackage{amsmath, amssymb}
\usepackage[margin=1in]{geometry}
\RequirePackage{tikz}
";

        assert_eq!(
            scan_packages(source),
            vec!["article", "amsmath", "amssymb", "geometry", "tikz"]
        );
    }

    #[test]
    fn commented_demands_are_ignored() {
        let source = "\\documentclass{article}\n% \\usepackage{fontspec}\n\\usepackage{amsmath} % \\usepackage{tikz}\n";

        assert_eq!(scan_packages(source), vec!["article", "amsmath"]);
        assert!(!requires_unicode_engine(source));
    }

    #[test]
    fn escaped_percent_is_not_a_comment() {
        let source = "\\documentclass{article}\nA 50\\% discount \\usepackage{xcolor}\n";
        assert!(scan_packages(source).contains(&"xcolor".to_owned()));
    }

    #[test]
    fn duplicates_collapse() {
        let source = "\\usepackage{amsmath}\n\\usepackage{amsmath}\n";
        assert_eq!(scan_packages(source), vec!["amsmath"]);
    }

    #[test]
    fn unicode_engine_detection() {
        assert!(requires_unicode_engine("\\usepackage{fontspec}"));
        assert!(requires_unicode_engine("\\usepackage{unicode-math}"));
        assert!(requires_unicode_engine("\\setmainfont{Libertinus Serif}"));
        assert!(requires_unicode_engine("\\setmonofont{JetBrains Mono}"));
        assert!(!requires_unicode_engine("\\usepackage{amsmath}"));
    }
}
