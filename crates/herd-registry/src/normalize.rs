//! Canonical URL form for backend addresses.

use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("invalid server url {url:?}: {reason}")]
    Invalid { url: String, reason: String },
    #[error("unsupported scheme {scheme:?} in server url {url:?}")]
    UnsupportedScheme { url: String, scheme: String },
}

/// Normalizes a backend URL to its canonical form.
///
/// Lowercases scheme and host, strips default ports (80 for http, 443 for
/// https), and strips trailing slashes from the path. Normalization is
/// idempotent: `normalize_url(normalize_url(u)) == normalize_url(u)`.
pub fn normalize_url(raw: &str) -> Result<String, NormalizeError> {
    let parsed = Url::parse(raw.trim()).map_err(|e| NormalizeError::Invalid {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(NormalizeError::UnsupportedScheme {
            url: raw.to_string(),
            scheme,
        });
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| NormalizeError::Invalid {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        })?
        .to_ascii_lowercase();

    // Url::port() already yields None for the scheme's default port.
    let port = parsed.port();

    let path = parsed.path().trim_end_matches('/');

    let mut out = format!("{scheme}://{host}");
    if let Some(port) = port {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(path);
    Ok(out)
}
