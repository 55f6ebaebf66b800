//! Canonical domain keys for per-host state.
//!
//! Every component keys its per-host bookkeeping by the value returned here,
//! so all casing/scheme/`www.` variants of one host share a single token
//! bucket and a single queue.

/// Reduce a URL or hostname to its canonical lowercase domain key.
///
/// Strips the scheme, a leading `www.`, and everything from the first `/`
/// (path) or `:` (port) onward. Purely string-level; no DNS resolution.
///
/// # Examples
/// ```
/// use floodgate::normalize_domain;
///
/// assert_eq!(normalize_domain("HTTPS://WWW.Example.org:8443/feed.xml"), "example.org");
/// assert_eq!(normalize_domain("example.org"), "example.org");
/// ```
pub fn normalize_domain(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let mut host = lowered.as_str();
    host = host.strip_prefix("http://").unwrap_or(host);
    host = host.strip_prefix("https://").unwrap_or(host);
    host = host.strip_prefix("www.").unwrap_or(host);
    let end = host.find(|c| c == '/' || c == ':').unwrap_or(host.len());
    host[..end].to_string()
}
