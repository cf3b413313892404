//! PKCE code verifier and S256 challenge generation (RFC 7636).

use {
    base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::{CryptoRng, Rng, distr::Alphanumeric},
    sha2::{Digest, Sha256},
};

use crate::{
    error::{Error, Result},
    types::PkceChallenge,
};

pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;

/// Verifier length used for every authorization attempt.
pub const DEFAULT_VERIFIER_LEN: usize = 64;

/// Generate a code verifier of exactly `length` alphanumeric characters.
pub fn generate_verifier(length: usize) -> Result<String> {
    generate_verifier_with(&mut rand::rng(), length)
}

/// Like [`generate_verifier`], drawing from the given cryptographically secure RNG.
pub fn generate_verifier_with<R: Rng + CryptoRng>(rng: &mut R, length: usize) -> Result<String> {
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&length) {
        return Err(Error::InvalidVerifierLength(length));
    }
    // Alphanumeric samples uniformly over [A-Za-z0-9] via rejection sampling.
    Ok(rng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect())
}

/// base64url(SHA-256(verifier)), unpadded.
pub fn derive_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

impl PkceChallenge {
    pub fn generate() -> Result<Self> {
        let verifier = generate_verifier(DEFAULT_VERIFIER_LEN)?;
        let challenge = derive_challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }

    pub fn method(&self) -> &'static str {
        "S256"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_length_and_alphabet() {
        for len in MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN {
            let v = generate_verifier(len).unwrap();
            assert_eq!(v.len(), len);
            assert!(v.chars().all(|c| c.is_ascii_alphanumeric()), "bad char in {v}");
        }
    }

    #[test]
    fn test_verifier_rejects_out_of_range_lengths() {
        assert!(matches!(
            generate_verifier(42),
            Err(Error::InvalidVerifierLength(42))
        ));
        assert!(matches!(
            generate_verifier(129),
            Err(Error::InvalidVerifierLength(129))
        ));
        assert!(generate_verifier(0).is_err());
    }

    #[test]
    fn test_verifiers_are_unique() {
        let a = generate_verifier(64).unwrap();
        let b = generate_verifier(64).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_challenge_is_deterministic_and_url_safe() {
        let verifier = generate_verifier(64).unwrap();
        let first = derive_challenge(&verifier);
        let second = derive_challenge(&verifier);
        assert_eq!(first, second);
        assert_eq!(first.len(), 43);
        assert!(!first.contains(['+', '/', '=']));
    }

    #[test]
    fn test_challenge_rfc7636_vector() {
        // Appendix B of RFC 7636.
        assert_eq!(
            derive_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_generate_pair() {
        let pkce = PkceChallenge::generate().unwrap();
        assert_eq!(pkce.verifier.len(), DEFAULT_VERIFIER_LEN);
        assert_eq!(pkce.challenge, derive_challenge(&pkce.verifier));
        assert_eq!(pkce.method(), "S256");
    }
}
