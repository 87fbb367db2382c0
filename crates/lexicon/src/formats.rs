//! Fixed predicates for the lexicon string formats, plus MIME range
//! matching.

use std::sync::OnceLock;

use regex::Regex;
use xr_domain::is_valid_nsid;

use crate::model::StringFormat;

const MAX_HANDLE_LEN: usize = 253;
const MAX_URI_LEN: usize = 8 * 1024;

macro_rules! static_re {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("format pattern compiles"))
        }
    };
}

static_re!(
    domain_re,
    r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]([a-z0-9-]*[a-z0-9])?$"
);
static_re!(did_re, r"^did:[a-z]+:[A-Za-z0-9._%:-]{1,2048}$");
static_re!(cid_re, r"^[A-Za-z0-9+]{8,}$");
static_re!(language_re, r"^(i|[a-z]{2,3})(-[A-Za-z0-9-]+)?$");
static_re!(tid_re, r"^[234567abcdefghij][234567a-z]{12}$");
static_re!(record_key_re, r"^[A-Za-z0-9._:~-]{1,512}$");
static_re!(uri_re, r"^[a-zA-Z][a-zA-Z0-9+.-]*:[^\s]+$");
static_re!(at_rkey_re, r"^[a-zA-Z0-9.:~_-]+$");
static_re!(tz_suffix_re, r"(Z|[+-][0-9]{2}:[0-9]{2})$");

/// Returns true when `value` satisfies `format`.
pub fn check(format: StringFormat, value: &str) -> bool {
    match format {
        StringFormat::Datetime => is_datetime(value),
        StringFormat::Uri => is_uri(value),
        StringFormat::Did => is_did(value),
        StringFormat::Handle => is_handle(value),
        StringFormat::AtIdentifier => is_did(value) || is_handle(value),
        StringFormat::AtUri => is_at_uri(value),
        StringFormat::Nsid => is_valid_nsid(value),
        StringFormat::Cid => cid_re().is_match(value),
        StringFormat::Language => language_re().is_match(value),
        StringFormat::Tid => tid_re().is_match(value),
        StringFormat::RecordKey => is_record_key(value),
    }
}

pub fn is_did(value: &str) -> bool {
    !value.ends_with(':') && did_re().is_match(value)
}

pub fn is_handle(value: &str) -> bool {
    value.len() <= MAX_HANDLE_LEN && domain_re().is_match(&value.to_ascii_lowercase())
}

/// RFC 3339 with a mandatory `T` separator and explicit offset.
pub fn is_datetime(value: &str) -> bool {
    value.contains('T')
        && tz_suffix_re().is_match(value)
        && chrono::DateTime::parse_from_rfc3339(value).is_ok()
}

pub fn is_uri(value: &str) -> bool {
    value.len() < MAX_URI_LEN && uri_re().is_match(value)
}

pub fn is_record_key(value: &str) -> bool {
    value != "." && value != ".." && record_key_re().is_match(value)
}

/// `at://<did|handle>[/<collection nsid>[/<rkey>]]`
pub fn is_at_uri(value: &str) -> bool {
    let Some(rest) = value.strip_prefix("at://") else {
        return false;
    };
    let mut parts = rest.splitn(3, '/');
    let repo = parts.next().unwrap_or_default();
    if !(is_did(repo) || is_handle(repo)) {
        return false;
    }
    match (parts.next(), parts.next()) {
        (None, _) => true,
        (Some(collection), None) => is_valid_nsid(collection),
        (Some(collection), Some(rkey)) => {
            is_valid_nsid(collection) && at_rkey_re().is_match(rkey)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MIME ranges
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Matches a MIME type against one range: `type/subtype`, `type/*`, `*/*`
/// (or bare `*`).  Parameters such as `; charset=utf-8` are ignored.
pub fn mime_matches(range: &str, mime: &str) -> bool {
    let essence = |s: &str| s.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    let range = essence(range);
    let mime = essence(mime);
    if range == "*/*" || range == "*" {
        return true;
    }
    match range.strip_suffix("/*") {
        Some(prefix) => mime.split_once('/').is_some_and(|(ty, _)| ty == prefix),
        None => range == mime,
    }
}

/// True when `mime` matches any of `accept`; an empty list accepts anything.
pub fn mime_accepted(accept: &[String], mime: &str) -> bool {
    accept.is_empty() || accept.iter().any(|range| mime_matches(range, mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_requires_offset_and_t() {
        assert!(is_datetime("2022-11-03T12:00:00Z"));
        assert!(is_datetime("2022-11-03T12:00:00.123+05:30"));
        assert!(!is_datetime("2022-11-03 12:00:00Z"));
        assert!(!is_datetime("2022-11-03T12:00:00"));
        assert!(!is_datetime("2022-13-03T12:00:00Z"));
        assert!(!is_datetime("yesterday"));
    }

    #[test]
    fn did_and_handle() {
        assert!(is_did("did:plc:z72i7hdynmk6r22z27h6tvur"));
        assert!(is_did("did:web:example.com"));
        assert!(!is_did("did:plc:"));
        assert!(!is_did("did:web:foo:"));
        assert!(!is_did("plc:abc"));
        assert!(is_handle("alice.bsky.social"));
        assert!(is_handle("Alice.Example.COM"));
        assert!(!is_handle("alice"));
        assert!(!is_handle("-bad.example.com"));
        assert!(check(StringFormat::AtIdentifier, "did:plc:abc"));
        assert!(check(StringFormat::AtIdentifier, "alice.test"));
    }

    #[test]
    fn at_uri_forms() {
        assert!(is_at_uri("at://did:plc:abc"));
        assert!(is_at_uri("at://alice.test/app.bsky.feed.post"));
        assert!(is_at_uri("at://did:plc:abc/app.bsky.feed.post/3jwdwj2ctlk26"));
        assert!(!is_at_uri("https://alice.test"));
        assert!(!is_at_uri("at://alice.test/not-an-nsid"));
        assert!(!is_at_uri("at://nope"));
    }

    #[test]
    fn tid_record_key_cid_language() {
        assert!(check(StringFormat::Tid, "3jzfcijpj2z2a"));
        assert!(!check(StringFormat::Tid, "3jzfcijpj2z2"));
        assert!(!check(StringFormat::Tid, "zjzfcijpj2z2a"));
        assert!(check(StringFormat::RecordKey, "self"));
        assert!(!check(StringFormat::RecordKey, ".."));
        assert!(!check(StringFormat::RecordKey, "a/b"));
        assert!(check(StringFormat::Cid, "bafyreidfayvfuwqa7qlnopdjiqrxzs6blmoeu4rujcjtnci5beludirz2a"));
        assert!(!check(StringFormat::Cid, "short"));
        assert!(check(StringFormat::Language, "en"));
        assert!(check(StringFormat::Language, "pt-BR"));
        assert!(!check(StringFormat::Language, "english"));
    }

    #[test]
    fn uri_and_nsid() {
        assert!(is_uri("https://example.com/path?q=1"));
        assert!(is_uri("mailto:me@example.com"));
        assert!(!is_uri("not a uri"));
        assert!(!is_uri("/relative"));
        assert!(check(StringFormat::Nsid, "com.atproto.server.createSession"));
        assert!(!check(StringFormat::Nsid, "createSession"));
    }

    #[test]
    fn mime_ranges() {
        assert!(mime_matches("*/*", "image/png"));
        assert!(mime_matches("image/*", "image/png"));
        assert!(mime_matches("image/png", "image/PNG"));
        assert!(mime_matches("application/json", "application/json; charset=utf-8"));
        assert!(!mime_matches("image/*", "video/mp4"));
        assert!(!mime_matches("image/png", "image/jpeg"));
        assert!(mime_accepted(&[], "anything/at-all"));
        assert!(mime_accepted(&["video/*".into(), "image/jpeg".into()], "image/jpeg"));
    }
}
