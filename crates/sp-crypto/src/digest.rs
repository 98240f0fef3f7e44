//! Message digest functions.
//!
//! SHA-1 is kept for protocol compatibility: SAML artifacts carry a
//! SHA-1(entityID) SourceID, and the default XML-DSig digest method in
//! deployed federations is still SHA-1.

use aws_lc_rs::digest;

/// Digest algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// SHA-1 (legacy interoperability only).
    Sha1,
    /// SHA-256.
    Sha256,
    /// SHA-384.
    Sha384,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// Computes the digest of `data` with this algorithm.
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let alg = match self {
            Self::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => &digest::SHA256,
            Self::Sha384 => &digest::SHA384,
            Self::Sha512 => &digest::SHA512,
        };
        digest::digest(alg, data).as_ref().to_vec()
    }

    /// Digest output length in bytes.
    #[must_use]
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

/// Computes a SHA-1 digest (legacy interoperability only).
#[must_use]
pub fn sha1(data: &[u8]) -> Vec<u8> {
    DigestAlgorithm::Sha1.digest(data)
}

/// Computes a SHA-256 digest.
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    DigestAlgorithm::Sha256.digest(data)
}

/// Computes a SHA-384 digest.
#[must_use]
pub fn sha384(data: &[u8]) -> Vec<u8> {
    DigestAlgorithm::Sha384.digest(data)
}

/// Computes a SHA-512 digest.
#[must_use]
pub fn sha512(data: &[u8]) -> Vec<u8> {
    DigestAlgorithm::Sha512.digest(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_produces_correct_length() {
        assert_eq!(sha1(b"test").len(), 20);
    }

    #[test]
    fn sha256_produces_correct_length() {
        assert_eq!(sha256(b"test").len(), 32);
    }

    #[test]
    fn sha1_known_vector() {
        // SHA-1("abc")
        assert_eq!(
            hex::encode(sha1(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn digests_are_deterministic() {
        assert_eq!(sha384(b"hello world"), sha384(b"hello world"));
        assert_ne!(sha512(b"hello"), sha512(b"world"));
    }
}
