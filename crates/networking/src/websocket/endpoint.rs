//! Socket endpoint URL construction

use livefeed_core::{EndpointConfig, Error, Result};
use std::collections::BTreeMap;
use url::Url;

/// Build a ws/wss URL from a base address, a path and query parameters
///
/// `http`/`https` bases are mapped to `ws`/`wss` so the same host setting can
/// serve both the read API and the socket. Parameters are appended after any
/// query the base already carries; `BTreeMap` keeps their order stable, which
/// matters because the resulting string is the registry key.
pub fn build_ws_url(base: &str, path: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let mut url = Url::parse(base)?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(Error::InvalidUrl(format!(
                "unsupported socket scheme '{}' in {}",
                other, base
            )))
        }
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|_| Error::InvalidUrl(format!("cannot use {} with {}", scheme, base)))?;
    }

    if !path.is_empty() {
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
    }

    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }

    Ok(url.into())
}

/// Build the socket URL described by an [`EndpointConfig`]
pub fn endpoint_url(config: &EndpointConfig) -> Result<String> {
    build_ws_url(&config.base_url, &config.path, &config.params)
}
