// src/utils/url.rs

//! URL manipulation utilities.

use url::Url;

/// Sentinel name for a page whose URL path is empty.
pub const INDEX_NAME: &str = "index";

/// Extension given to every page inside the archive.
pub const PAGE_EXTENSION: &str = "md";

/// Strip the parts of a URL that never change the fetched document.
///
/// # Examples
/// ```
/// use url::Url;
/// use vault_archiver::utils::url::normalize;
///
/// let url = Url::parse("https://Site.Example:443/a#top").unwrap();
/// assert_eq!(normalize(&url).as_str(), "https://site.example/a");
/// ```
pub fn normalize(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized
}

/// Whether two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

/// Resolve an anchor `href` found on `base` into a crawlable URL.
///
/// Returns `None` for fragment-only links, non-HTTP schemes and
/// anything that fails to parse.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let resolved = base.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(normalize(&resolved)),
        _ => None,
    }
}

/// Derive the stable site identifier from a URL's first path segment.
///
/// # Examples
/// ```
/// use url::Url;
/// use vault_archiver::utils::url::site_identifier;
///
/// let url = Url::parse("https://site.example/Vault-A/notes/1").unwrap();
/// assert_eq!(site_identifier(&url), Some("vault-a".to_string()));
/// ```
pub fn site_identifier(url: &Url) -> Option<String> {
    url.path_segments()?
        .find(|segment| !segment.is_empty())
        .map(|segment| segment.to_lowercase())
}

/// Assign the archive-relative file path for a fetched page.
///
/// Leading and trailing slashes are stripped, an empty path becomes
/// [`INDEX_NAME`], and every page ends in [`PAGE_EXTENSION`]. Two URLs
/// may map to the same path; the later page overwrites the earlier.
pub fn archive_path(url: &Url) -> String {
    let trimmed = url.path().trim_matches('/');

    let segments: Vec<String> = trimmed
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(sanitize_segment)
        .collect();

    let mut path = if segments.is_empty() {
        INDEX_NAME.to_string()
    } else {
        segments.join("/")
    };

    for ext in [".html", ".htm", ".php", ".md"] {
        if let Some(stripped) = path.strip_suffix(ext) {
            if !stripped.is_empty() && !stripped.ends_with('/') {
                path = stripped.to_string();
            }
            break;
        }
    }

    format!("{path}.{PAGE_EXTENSION}")
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
