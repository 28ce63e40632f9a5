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

//! Scrubbing of credentials from messages.
//!
//! RPC endpoints routinely carry provider API keys in their path or query, and
//! transport errors echo the endpoint back. Anything that leaves the process
//! (HTTP responses, and log lines derived from URLs) goes through
//! [`scrub_sensitive`].

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Replacement for a URL.
pub const URL_PLACEHOLDER: &str = "[url]";
/// Replacement for a long token.
pub const TOKEN_PLACEHOLDER: &str = "[redacted]";

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b[a-z][a-z0-9+.\-]*://[^\s"'<>()\[\]{}]+"#).expect("valid url regex")
});

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9_\-]{32,}\b").expect("valid token regex"));

static HEX_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]+$").expect("valid hex regex"));

/// Replace every URL with `[url]` and every alphanumeric run of 32 or more
/// characters that is not a `0x`-prefixed hex word with `[redacted]`.
///
/// Addresses, hashes and calldata stay readable; keys do not.
pub fn scrub_sensitive(message: &str) -> String {
    let without_urls = URL_RE.replace_all(message, URL_PLACEHOLDER);
    let scrubbed = TOKEN_RE.replace_all(&without_urls, |caps: &Captures<'_>| {
        let token = &caps[0];
        if HEX_WORD_RE.is_match(token) {
            Cow::Owned(token.to_string())
        } else {
            Cow::Borrowed(TOKEN_PLACEHOLDER)
        }
    });
    scrubbed.into_owned()
}

/// Scheme and host of a URL, for log lines that need to say which endpoint was
/// used without leaking its credentials.
pub fn redacted_endpoint(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
            let host = authority.rsplit('@').next().unwrap_or(authority);
            scrub_token_only(&format!("{scheme}://{host}"))
        }
        None => scrub_sensitive(url),
    }
}

fn scrub_token_only(text: &str) -> String {
    TOKEN_RE.replace_all(text, TOKEN_PLACEHOLDER).into_owned()
}
