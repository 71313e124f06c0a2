//! Control-server authentication.
//!
//! A shared secret persisted at `<home>/daemon.auth` (0600). Every request
//! carries it in `X-Touchgrass-Auth`; comparison is constant-time.

use axum::http::HeaderMap;
use rand::Rng;
use subtle::ConstantTimeEq;

use tg_core::paths::{write_private, Paths};
use tg_core::Result;

pub const AUTH_HEADER: &str = "x-touchgrass-auth";

/// Load the persisted secret, minting one on first run.
pub fn load_or_create_secret(paths: &Paths) -> Result<String> {
    let file = paths.auth_file();
    if let Ok(existing) = std::fs::read_to_string(&file) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let mut rng = rand::thread_rng();
    let secret: String = (0..48)
        .map(|_| {
            let chars = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
            chars[rng.gen_range(0..chars.len())] as char
        })
        .collect();
    write_private(&file, secret.as_bytes())?;
    Ok(secret)
}

/// Constant-time check of the auth header.
pub fn check_auth(secret: &str, headers: &HeaderMap) -> bool {
    let Some(provided) = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    provided.as_bytes().ct_eq(secret.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn secret_is_stable_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::at(dir.path());
        let first = load_or_create_secret(&paths).unwrap();
        let second = load_or_create_secret(&paths).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 48);
    }

    #[test]
    fn header_check() {
        let mut headers = HeaderMap::new();
        assert!(!check_auth("s3cret", &headers));

        headers.insert(AUTH_HEADER, HeaderValue::from_static("wrong"));
        assert!(!check_auth("s3cret", &headers));

        headers.insert(AUTH_HEADER, HeaderValue::from_static("s3cret"));
        assert!(check_auth("s3cret", &headers));
    }
}
