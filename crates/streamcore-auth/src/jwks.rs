//! Fetches a JSON Web Key Set at startup and resolves it to a
//! [`DecodingKey`]/[`Algorithm`] pair for [`crate::TokenVerifier`]. Fetched
//! once at process start; there is no background refresh, so a rotated key
//! requires a restart (the same operational posture as the symmetric-secret
//! keying mode, which is also fixed for the process lifetime).

use jsonwebtoken::jwk::{JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};

use crate::error::{Error, Result};

fn key_algorithm_to_algorithm(alg: KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        _ => None,
    }
}

/// Fetches `url`, parses it as a JWK Set, and selects a signing key: the
/// first key marked `"use": "sig"` if any are, otherwise the first key in
/// the set.
pub async fn fetch_decoding_key(url: &str) -> Result<(DecodingKey, Algorithm)> {
    let body = reqwest::get(url)
        .await
        .map_err(|e| Error::Configuration(format!("failed to fetch JWKS from {url}: {e}")))?
        .error_for_status()
        .map_err(|e| Error::Configuration(format!("JWKS endpoint {url} returned an error: {e}")))?
        .text()
        .await
        .map_err(|e| Error::Configuration(format!("failed to read JWKS response body: {e}")))?;

    let jwk_set: JwkSet = serde_json::from_str(&body)
        .map_err(|e| Error::Configuration(format!("invalid JWKS document: {e}")))?;

    let jwk = jwk_set
        .keys
        .iter()
        .find(|k| matches!(k.common.public_key_use, Some(jsonwebtoken::jwk::PublicKeyUse::Signature)))
        .or_else(|| jwk_set.keys.first())
        .ok_or_else(|| Error::Configuration(format!("JWKS at {url} contains no keys")))?;

    let algorithm = jwk
        .common
        .key_algorithm
        .and_then(key_algorithm_to_algorithm)
        .unwrap_or(Algorithm::RS256);

    let decoding_key = DecodingKey::from_jwk(jwk)
        .map_err(|e| Error::Configuration(format!("unusable JWKS key: {e}")))?;

    Ok((decoding_key, algorithm))
}
