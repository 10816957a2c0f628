//! URL helpers for the upload endpoints.

use url::Url;

use crate::{INITIATE_SUFFIX, ProtocolError};

/// Parses a target folder URL. Only absolute `http`/`https` URLs with a host
/// are accepted.
pub fn parse_target(target_url: &str) -> Result<Url, ProtocolError> {
    let url = Url::parse(target_url)
        .map_err(|e| ProtocolError::InvalidUrl(format!("{target_url}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProtocolError::InvalidUrl(format!(
            "unsupported scheme: {target_url}"
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ProtocolError::InvalidUrl(format!(
            "missing host: {target_url}"
        )));
    }
    Ok(url)
}

/// Returns the initiate endpoint for a target folder URL.
///
/// The suffix goes on the path; query and fragment are kept as they are.
pub fn initiate_url(target: &Url) -> Url {
    let mut url = target.clone();
    let path = format!("{}{INITIATE_SUFFIX}", folder_path(target));
    url.set_path(&path);
    url
}

/// Returns the folder path of a target URL without its trailing slash
/// (`/` for the root).
pub fn folder_path(target: &Url) -> &str {
    match target.path().trim_end_matches('/') {
        "" => "/",
        path => path,
    }
}

/// Returns the root of the target's host: same scheme, host and port with
/// path `/` and no query or fragment.
pub fn host_root(target: &Url) -> Url {
    let mut root = target.clone();
    root.set_path("/");
    root.set_query(None);
    root.set_fragment(None);
    root
}

/// Resolves a server-provided URI against the target's host root.
///
/// Absolute URIs (any scheme casing) and scheme-relative `//host/...` URIs
/// resolve to their own host.
pub fn resolve_uri(target: &Url, uri: &str) -> Result<Url, ProtocolError> {
    host_root(target)
        .join(uri)
        .map_err(|e| ProtocolError::InvalidUrl(format!("{uri}: {e}")))
}
