//! Request path normalization
//!
//! Every inbound path passes through three steps before it is classified:
//! a lexical clean that can never yield a traversal, stripping of legacy
//! front-controller prefixes, and a small exact-match alias table.
//!
//! Normalization works on decoded paths. [`decode_path`] runs first so that
//! escaped characters cannot slip a path past the routing rules, and
//! [`encode_path`] turns a normalized path back into URI form.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Front-controller scripts the legacy application historically exposed in URLs.
pub const LEGACY_ENTRY_SCRIPTS: &[&str] = &["index.php", "qubit_dev.php"];

/// Exact-match legacy aliases and their current equivalents.
const PATH_ALIASES: &[(&str, &str)] = &[("/storage/location/list", "/storage/list")];

/// Characters escaped when a decoded path goes back into a URI
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-decode a raw request path. Invalid UTF-8 becomes U+FFFD.
pub fn decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Escape a decoded path so it is a valid URI path again
pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_ENCODE_SET).to_string()
}

/// The outcome of normalizing a raw request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    /// Canonical path used for all classification
    pub path: String,
    /// A front-controller prefix was removed
    pub stripped_entry: bool,
    /// An alias rewrite was applied
    pub aliased: bool,
}

impl NormalizedPath {
    pub fn as_str(&self) -> &str {
        &self.path
    }
}

/// Run the full normalization pipeline on a raw request path.
pub fn normalize(raw: &str) -> NormalizedPath {
    let cleaned = clean_path(raw);

    let (path, stripped_entry) = match strip_entry_script(&cleaned) {
        Some(stripped) => (stripped, true),
        None => (cleaned, false),
    };

    let (path, aliased) = match rewrite_alias(&path) {
        Some(alias) => (alias.to_string(), true),
        None => (path, false),
    };

    NormalizedPath {
        path,
        stripped_entry,
        aliased,
    }
}

/// Lexically clean a path into a rooted form with `.` and `..` resolved.
///
/// Anything that still contains `..` afterwards collapses to `/`.
pub fn clean_path(raw: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let cleaned = format!("/{}", segments.join("/"));
    if cleaned.contains("..") {
        return "/".to_string();
    }
    cleaned
}

/// Remove a leading front-controller script from a cleaned path.
///
/// `/index.php/foo/bar` becomes `/foo/bar` and `/index.php` becomes `/`.
/// Repeated prefixes are removed until none remain. Returns `None` when the
/// path does not start with an entry script.
pub fn strip_entry_script(path: &str) -> Option<String> {
    let mut current = path;
    let mut stripped = false;

    'outer: loop {
        for script in LEGACY_ENTRY_SCRIPTS {
            let Some(rest) = current
                .strip_prefix('/')
                .and_then(|p| p.strip_prefix(script))
            else {
                continue;
            };
            if rest.is_empty() {
                return Some("/".to_string());
            }
            if rest.starts_with('/') {
                current = rest;
                stripped = true;
                continue 'outer;
            }
        }
        break;
    }

    stripped.then(|| current.to_string())
}

/// Look up an exact-match alias for a path.
pub fn rewrite_alias(path: &str) -> Option<&'static str> {
    PATH_ALIASES
        .iter()
        .find(|(from, _)| *from == path)
        .map(|(_, to)| *to)
}

/// Whether a path names a front-controller script directly.
pub fn is_entry_script(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    LEGACY_ENTRY_SCRIPTS.iter().any(|script| {
        rest.strip_prefix(script)
            .map(|tail| tail.is_empty() || tail.starts_with('/'))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_resolves_dots() {
        assert_eq!(clean_path("/a/./b/../c"), "/a/c");
        assert_eq!(clean_path("a//b///c/"), "/a/b/c");
        assert_eq!(clean_path(""), "/");
        assert_eq!(clean_path("/"), "/");
    }

    #[test]
    fn test_clean_never_escapes_root() {
        for raw in [
            "/../../etc/passwd",
            "../x",
            "/a/../../..",
            "/css/../../../secret.php",
            "/..",
        ] {
            let cleaned = clean_path(raw);
            assert!(cleaned.starts_with('/'), "{raw} -> {cleaned}");
            assert!(!cleaned.contains(".."), "{raw} -> {cleaned}");
        }
        assert_eq!(clean_path("/../../etc/passwd"), "/etc/passwd");
    }

    #[test]
    fn test_clean_collapses_residual_dot_dot() {
        assert_eq!(clean_path("/files/a..b"), "/");
        assert_eq!(clean_path("/...."), "/");
    }

    #[test]
    fn test_strip_entry_script() {
        assert_eq!(
            strip_entry_script("/index.php/foo/bar"),
            Some("/foo/bar".to_string())
        );
        assert_eq!(
            strip_entry_script("/qubit_dev.php/admin"),
            Some("/admin".to_string())
        );
        assert_eq!(strip_entry_script("/index.php"), Some("/".to_string()));
        assert_eq!(strip_entry_script("/qubit_dev.php"), Some("/".to_string()));
        assert_eq!(strip_entry_script("/index.phpx/foo"), None);
        assert_eq!(strip_entry_script("/foo/index.php"), None);
    }

    #[test]
    fn test_strip_repeated_entry_scripts() {
        assert_eq!(
            strip_entry_script("/index.php/qubit_dev.php/x"),
            Some("/x".to_string())
        );
        assert_eq!(
            strip_entry_script("/index.php/index.php"),
            Some("/".to_string())
        );
    }

    #[test]
    fn test_alias_rewrite() {
        assert_eq!(rewrite_alias("/storage/location/list"), Some("/storage/list"));
        assert_eq!(rewrite_alias("/storage/location/list/extra"), None);
    }

    #[test]
    fn test_normalize_pipeline() {
        let normalized = normalize("/index.php/informationobject/browse");
        assert_eq!(normalized.as_str(), "/informationobject/browse");
        assert!(normalized.stripped_entry);
        assert!(!normalized.aliased);

        let normalized = normalize("/index.php/storage/location/list");
        assert_eq!(normalized.as_str(), "/storage/list");
        assert!(normalized.stripped_entry);
        assert!(normalized.aliased);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in [
            "/index.php/informationobject/browse",
            "//css/./main.css",
            "/a/../../b",
            "/index.php/index.php/x",
            "/storage/location/list",
            "/qubit_dev.php",
            "/uploads/r/repo/conf/x",
        ] {
            let once = normalize(raw);
            let twice = normalize(once.as_str());
            assert_eq!(once.path, twice.path, "not idempotent for {raw}");
        }
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("/%70rivate/main.css"), "/private/main.css");
        assert_eq!(
            decode_path("/uploads/r/repo%2Fconf%2Fsettings.yml"),
            "/uploads/r/repo/conf/settings.yml"
        );
        assert_eq!(decode_path("/downloads/My%20Report.pdf"), "/downloads/My Report.pdf");
        assert_eq!(decode_path("/caf%C3%A9"), "/caf\u{e9}");
        assert_eq!(decode_path("/100%"), "/100%");
        assert_eq!(decode_path("/%FF"), "/\u{fffd}");
    }

    #[test]
    fn test_decoded_traversal_is_cleaned() {
        let decoded = decode_path("/css/%2e%2e/%2E%2E/etc/passwd");
        assert_eq!(normalize(&decoded).as_str(), "/etc/passwd");
        assert_eq!(normalize(&decode_path("/%69ndex.php/actor")).as_str(), "/actor");
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("/downloads/My Report.pdf"), "/downloads/My%20Report.pdf");
        assert_eq!(encode_path("/a?b#c%d"), "/a%3Fb%23c%25d");
        assert_eq!(encode_path("/caf\u{e9}"), "/caf%C3%A9");
        assert_eq!(encode_path("/actor/browse"), "/actor/browse");
        assert_eq!(decode_path(&encode_path("/100% done?")), "/100% done?");
    }

    #[test]
    fn test_is_entry_script() {
        assert!(is_entry_script("/index.php"));
        assert!(is_entry_script("/qubit_dev.php/x"));
        assert!(!is_entry_script("/index.php5"));
        assert!(!is_entry_script("/other.php"));
    }
}
