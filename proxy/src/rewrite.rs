//! Inbound path to upstream URL mapping.

use crate::errors::ProxyError;
use hyper::Uri;
use url::Url;

/// Strips `prefix` from the front of `path` when present. Purely textual: `/production` loses
/// `/prod` just like `/prod/x` does.
pub fn rewrite_path<'a>(prefix: &str, path: &'a str) -> &'a str {
    if prefix.is_empty() {
        return path;
    }
    path.strip_prefix(prefix).unwrap_or(path)
}

/// Joins `path` onto the base URL and appends the inbound query string as is.
pub fn build_target_url(base: &Url, path: &str, query: Option<&str>) -> Result<Uri, ProxyError> {
    check_percent_encoding(path)?;

    let base_path = base.path().trim_end_matches('/');
    let joined = match path {
        "" => base_path.to_string(),
        p if p.starts_with('/') => format!("{base_path}{p}"),
        p => format!("{base_path}/{p}"),
    };

    let mut url = base.clone();
    url.set_path(&joined);
    url.set_query(query.filter(|q| !q.is_empty()));
    url.set_fragment(None);

    url.as_str()
        .parse::<Uri>()
        .map_err(|e| ProxyError::InvalidPath(format!("{path}: {e}")))
}

fn check_percent_encoding(path: &str) -> Result<(), ProxyError> {
    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                return Err(ProxyError::InvalidPath(format!(
                    "invalid escape at byte {i} of {path:?}"
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    Ok(())
}
