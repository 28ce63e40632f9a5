// Walnut - EVM Transaction Debugger
// Copyright (C) 2025 The Walnut Team
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! `pragma solidity` compatibility check.
//!
//! This is deliberately a subset of semver: each comparator is checked on its
//! own, comparators separated by whitespace must all hold, and `||`
//! alternatives need only one to hold.

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;

static PRAGMA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"pragma\s+solidity\s+([^;]+);").expect("pragma regex is valid")
});

/// Outcome of comparing a pragma with the available compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheck {
    /// The pragma admits the compiler
    Compatible,
    /// The pragma does not admit the compiler
    Mismatch {
        /// The pragma's version requirement
        required: String,
    },
    /// The source has no `pragma solidity` directive
    PragmaNotFound,
}

/// The version requirement of the first `pragma solidity` directive.
pub fn find_pragma(source: &str) -> Option<String> {
    PRAGMA_RE.captures(source).map(|c| c[1].trim().to_string())
}

/// Compare the pragma of `source` with `available`.
pub fn check_pragma(source: &str, available: &Version) -> VersionCheck {
    match find_pragma(source) {
        None => VersionCheck::PragmaNotFound,
        Some(required) if version_satisfies(&required, available) => VersionCheck::Compatible,
        Some(required) => VersionCheck::Mismatch { required },
    }
}

/// Whether `available` satisfies `requirement`.
pub fn version_satisfies(requirement: &str, available: &Version) -> bool {
    let available = (available.major, available.minor, available.patch);
    requirement.split("||").any(|alternative| {
        let alternative = alternative.trim();
        if let Some((low, high)) = alternative.split_once(" - ") {
            return match (parse_triple(low), parse_triple(high)) {
                (Some(low), Some(high)) => available >= low && available <= high,
                _ => false,
            };
        }
        let comparators = join_operators(alternative);
        !comparators.is_empty() && comparators.iter().all(|c| comparator_holds(c, available))
    })
}

/// `>= 0.8.0` is one comparator, not two.
fn join_operators(requirement: &str) -> Vec<String> {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending = String::new();
    for token in requirement.split_whitespace() {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '^' | '~')) {
            pending.push_str(token);
        } else {
            comparators.push(format!("{pending}{token}"));
            pending.clear();
        }
    }
    comparators
}

type Triple = (u64, u64, u64);

fn parse_triple(text: &str) -> Option<Triple> {
    let core = text.trim().trim_start_matches('v');
    let core = core.split(['+', '-']).next()?;
    let mut parts = core.split('.').map(|p| if p == "x" || p == "*" { Ok(0) } else { p.parse() });
    let major = parts.next()?.ok()?;
    let minor = parts.next().unwrap_or(Ok(0)).ok()?;
    let patch = parts.next().unwrap_or(Ok(0)).ok()?;
    Some((major, minor, patch))
}

fn comparator_holds(comparator: &str, available: Triple) -> bool {
    let split = comparator.find(|c: char| c.is_ascii_digit() || c == 'v').unwrap_or(0);
    let (op, version) = comparator.split_at(split);
    let Some(required) = parse_triple(version) else { return false };

    match op {
        "^" => available.0 == required.0 && (available.1, available.2) >= (required.1, required.2),
        "~" => {
            available.0 == required.0 && available.1 == required.1 && available.2 >= required.2
        }
        ">=" => available >= required,
        ">" => available > required,
        "<=" => available <= required,
        "<" => available < required,
        "" | "=" => available == required,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_find_pragma() {
        let source = "// SPDX\npragma solidity   >=0.6.2 <0.9.0 ;\ncontract A {}";
        assert_eq!(find_pragma(source).as_deref(), Some(">=0.6.2 <0.9.0"));
        assert_eq!(find_pragma("contract A {}"), None);
    }

    #[test]
    fn test_caret() {
        assert!(version_satisfies("^0.8.4", &v("0.8.19")));
        assert!(version_satisfies("^0.8.4", &v("0.8.4")));
        assert!(!version_satisfies("^0.8.4", &v("0.8.3")));
        assert!(!version_satisfies("^0.7.0", &v("0.8.19")));
        assert!(!version_satisfies("^0.8.0", &v("1.8.0")));
    }

    #[test]
    fn test_exact_strips_build_metadata() {
        assert!(version_satisfies("0.8.19", &v("0.8.19+commit.7dd6d404")));
        assert!(version_satisfies("=0.8.19", &v("0.8.19")));
        assert!(!version_satisfies("0.8.19", &v("0.8.20")));
    }

    #[test]
    fn test_bounds_and_alternatives() {
        assert!(version_satisfies(">=0.6.2 <0.9.0", &v("0.8.26")));
        assert!(!version_satisfies(">=0.6.2 <0.8.0", &v("0.8.26")));
        assert!(version_satisfies(">= 0.8.0", &v("0.8.26")));
        assert!(version_satisfies("^0.6.0 || ^0.8.0", &v("0.8.1")));
        assert!(version_satisfies("0.8.0 - 0.8.10", &v("0.8.5")));
        assert!(!version_satisfies("garbage", &v("0.8.5")));
    }

    #[test]
    fn test_check_pragma() {
        let available = v("0.8.26");
        assert_eq!(check_pragma("pragma solidity ^0.8.0;", &available), VersionCheck::Compatible);
        assert_eq!(
            check_pragma("pragma solidity 0.7.6;", &available),
            VersionCheck::Mismatch { required: "0.7.6".into() }
        );
        assert_eq!(check_pragma("contract A {}", &available), VersionCheck::PragmaNotFound);
    }
}
