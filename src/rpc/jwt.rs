//! Per-call JWT minting: a pure function `(secret, now) -> bearer`, plus the secret file format
//! (ASCII hex, optionally `0x`-prefixed, trimmed of surrounding whitespace) and generation.

use color_eyre::{eyre::Context, Result};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Default length, in hex characters, of a generated secret (32 bytes).
const DEFAULT_SECRET_HEX_LEN: usize = 64;

/// The claims minted into every request's bearer token. `iat` is the only claim the spec
/// requires; a fresh value each call is what gives two requests issued a second apart distinct
/// tokens.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iat: u64,
}

/// Reads a JWT secret from `path`, accepting ASCII hex optionally prefixed with `0x` and
/// trimmed of surrounding whitespace.
pub(crate) fn read_secret_file(path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read JWT secret file {:?}", path))?;
    parse_secret(&raw)
}

/// Parses a secret string in the on-disk format described by [`read_secret_file`].
fn parse_secret(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(hex_str).wrap_err("JWT secret is not valid hex")
}

/// Generates a new secret of `hex_len` hex characters (`hex_len / 2` random bytes) and writes it
/// to `path` as `0x`-prefixed hex.
pub(crate) fn generate_secret_file(path: &Path, hex_len: Option<usize>) -> Result<()> {
    let hex_len = hex_len.unwrap_or(DEFAULT_SECRET_HEX_LEN);
    let mut bytes = vec![0u8; hex_len / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    let encoded = format!("0x{}", hex::encode(&bytes));
    fs::write(path, encoded).wrap_err_with(|| format!("failed to write JWT secret to {:?}", path))
}

/// Mints a fresh HS256 bearer token for `secret`, with `iat` set to `now` (seconds since the
/// Unix epoch). A pure function: the client holds only the secret, never a token cache, so a
/// fresh `iat` per call falls out naturally from calling this once per dispatched request.
pub(crate) fn mint(secret: &[u8], now: u64) -> Result<String> {
    let claims = Claims { iat: now };
    let header = Header::new(jsonwebtoken::Algorithm::HS256);
    let key = EncodingKey::from_secret(secret);
    encode(&header, &claims, &key).wrap_err("failed to mint JWT")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_0x_prefixed_secret() {
        let secret = parse_secret("0xdeadbeef\n").unwrap();
        assert_eq!(secret, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn parses_unprefixed_secret_with_whitespace() {
        let secret = parse_secret("  deadbeef  ").unwrap();
        assert_eq!(secret, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn rejects_non_hex_secret() {
        assert!(parse_secret("not hex at all").is_err());
    }

    #[test]
    fn mint_embeds_requested_iat() {
        let secret = b"supersecret";
        let token = mint(secret, 1_000).unwrap();

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = false;
        let decoded = jsonwebtoken::decode::<Claims>(
            &token,
            &jsonwebtoken::DecodingKey::from_secret(secret),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims.iat, 1_000);
    }

    #[test]
    fn two_mints_a_second_apart_differ() {
        let secret = b"supersecret";
        let a = mint(secret, 1_000).unwrap();
        let b = mint(secret, 1_001).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn generate_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jwt.hex");
        generate_secret_file(&path, Some(64)).unwrap();

        let secret = read_secret_file(&path).unwrap();
        assert_eq!(secret.len(), 32);
    }
}
