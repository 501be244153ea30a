//! URL resolution
//!
//! Turns a command-line argument into a ResolvedUrl: alias prefixes are
//! substituted first, the trailing recursive-descent marker (`...`) is
//! stripped and recorded, and the remainder is classified as a filesystem
//! path or an object-store URL. Pure functions, no I/O.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Trailing sentinel marking a URL as a subtree root.
pub const RECURSIVE_SEPARATOR: &str = "...";

const PATH_SEPARATOR: char = '/';

/// Storage backend class of a resolved URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlScheme {
    Filesystem,
    ObjectStore,
}

/// A fully resolved storage location.
///
/// For filesystem URLs `host` is empty and `path` is the (possibly relative)
/// local path. For object-store URLs `path` is `bucket[/key]` and `secure`
/// records whether the endpoint was given as https.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub scheme: UrlScheme,
    pub host: String,
    pub path: String,
    pub secure: bool,
    pub recursive: bool,
}

impl ResolvedUrl {
    /// Rebuild the URL string without the recursive marker.
    pub fn to_url_string(&self) -> String {
        match self.scheme {
            UrlScheme::Filesystem => self.path.clone(),
            UrlScheme::ObjectStore => {
                let proto = if self.secure { "https" } else { "http" };
                if self.path.is_empty() {
                    format!("{proto}://{}", self.host)
                } else {
                    format!("{proto}://{}/{}", self.host, self.path)
                }
            }
        }
    }
}

impl std::fmt::Display for ResolvedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_url_string())
    }
}

/// True if the URL ends with the recursive-descent marker.
pub fn is_url_recursive(url: &str) -> bool {
    url.ends_with(RECURSIVE_SEPARATOR)
}

/// Strip the trailing recursive marker. An emptied URL becomes ".".
pub fn strip_recursive_url(url: &str) -> String {
    let mut stripped = url.strip_suffix(RECURSIVE_SEPARATOR).unwrap_or(url);
    stripped = stripped.strip_suffix(PATH_SEPARATOR).unwrap_or(stripped);
    if stripped.is_empty() {
        return ".".to_string();
    }
    stripped.to_string()
}

/// Expand a leading alias into its base URL.
///
/// Matches either the whole argument or the segment before the first `/`.
/// Arguments that match no alias are returned unchanged.
pub fn alias_expand(arg: &str, aliases: &BTreeMap<String, String>) -> String {
    if let Some(base) = aliases.get(arg) {
        return base.trim_end_matches(PATH_SEPARATOR).to_string();
    }
    if let Some((head, rest)) = arg.split_once(PATH_SEPARATOR)
        && let Some(base) = aliases.get(head)
    {
        return format!("{}/{}", base.trim_end_matches(PATH_SEPARATOR), rest);
    }
    arg.to_string()
}

/// Resolve a single command-line argument into a storage location.
pub fn resolve(arg: &str, aliases: &BTreeMap<String, String>) -> Result<ResolvedUrl> {
    if arg.is_empty() {
        return Err(Error::InvalidUrl("empty argument".to_string()));
    }

    let expanded = alias_expand(arg, aliases);

    // The marker is only meaningful at the very end.
    let recursive = is_url_recursive(&expanded);
    let stripped = strip_recursive_url(&expanded);
    if stripped.contains(RECURSIVE_SEPARATOR) {
        return Err(Error::InvalidUrl(format!(
            "'{RECURSIVE_SEPARATOR}' is only allowed at the end of a URL: {arg}"
        )));
    }

    if stripped.starts_with("https://") || stripped.starts_with("http://") {
        let secure = stripped.starts_with("https://");
        let parsed =
            url::Url::parse(&stripped).map_err(|e| Error::InvalidUrl(format!("{arg}: {e}")))?;
        let host = match parsed.host_str() {
            Some(h) if !h.is_empty() => h,
            _ => return Err(Error::InvalidUrl(format!("{arg}: missing host"))),
        };
        let host = match parsed.port() {
            Some(p) => format!("{host}:{p}"),
            None => host.to_string(),
        };
        let path = parsed.path().trim_matches(PATH_SEPARATOR).to_string();
        return Ok(ResolvedUrl {
            scheme: UrlScheme::ObjectStore,
            host,
            path,
            secure,
            recursive,
        });
    }

    // Any other "scheme://" prefix is neither filesystem nor object store.
    if let Some((scheme, _)) = stripped.split_once("://") {
        return Err(Error::UnsupportedScheme(format!("{scheme}: {arg}")));
    }

    Ok(ResolvedUrl {
        scheme: UrlScheme::Filesystem,
        host: String::new(),
        path: stripped,
        secure: false,
        recursive,
    })
}

/// Join a base URL string and a relative key with a single separator.
pub fn join_url(base: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches(PATH_SEPARATOR),
        suffix.trim_start_matches(PATH_SEPARATOR)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_aliases() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn test_recursive_marker() {
        assert!(is_url_recursive("a/b/..."));
        assert!(!is_url_recursive("a/b"));
        assert_eq!(strip_recursive_url("a/b/..."), "a/b");
        assert_eq!(strip_recursive_url("..."), ".");
        assert_eq!(strip_recursive_url(""), ".");
    }

    #[test]
    fn test_resolve_filesystem() {
        let url = resolve("/tmp/data/...", &no_aliases()).unwrap();
        assert_eq!(url.scheme, UrlScheme::Filesystem);
        assert_eq!(url.path, "/tmp/data");
        assert!(url.recursive);
        assert!(url.host.is_empty());

        let url = resolve("relative/dir", &no_aliases()).unwrap();
        assert_eq!(url.scheme, UrlScheme::Filesystem);
        assert!(!url.recursive);
    }

    #[test]
    fn test_resolve_object_store() {
        let url = resolve("https://play.example.io:9000/bucket/key", &no_aliases()).unwrap();
        assert_eq!(url.scheme, UrlScheme::ObjectStore);
        assert_eq!(url.host, "play.example.io:9000");
        assert_eq!(url.path, "bucket/key");
        assert!(url.secure);

        let url = resolve("http://localhost:9000/bucket/...", &no_aliases()).unwrap();
        assert!(!url.secure);
        assert!(url.recursive);
        assert_eq!(url.path, "bucket");
    }

    #[test]
    fn test_resolve_alias_expansion() {
        let mut aliases = BTreeMap::new();
        aliases.insert(
            "play".to_string(),
            "https://play.example.io:9000".to_string(),
        );

        let url = resolve("play/bucket/obj.txt", &aliases).unwrap();
        assert_eq!(url.scheme, UrlScheme::ObjectStore);
        assert_eq!(url.host, "play.example.io:9000");
        assert_eq!(url.path, "bucket/obj.txt");

        let url = resolve("play", &aliases).unwrap();
        assert_eq!(url.scheme, UrlScheme::ObjectStore);
        assert!(url.path.is_empty());
    }

    #[test]
    fn test_resolve_idempotent() {
        let mut aliases = BTreeMap::new();
        aliases.insert("s".to_string(), "https://s3.example.com".to_string());

        for arg in ["s/bucket/a/b.txt", "/var/data/file", "http://h:9000/b/k"] {
            let first = resolve(arg, &aliases).unwrap();
            let second = resolve(&first.to_url_string(), &aliases).unwrap();
            assert_eq!(first, second, "resolution not idempotent for {arg}");
        }
    }

    #[test]
    fn test_non_terminal_marker_is_error() {
        let err = resolve("a/.../b", &no_aliases()).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = resolve("ftp://host/path", &no_aliases()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedScheme(_)));
    }

    #[test]
    fn test_missing_host_is_invalid() {
        let err = resolve("http:///bucket", &no_aliases()).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("/tmp/dir/", "a/b.txt"), "/tmp/dir/a/b.txt");
        assert_eq!(join_url("http://h/b", "k"), "http://h/b/k");
        assert_eq!(join_url("/tmp/f.txt", ""), "/tmp/f.txt");
    }
}
