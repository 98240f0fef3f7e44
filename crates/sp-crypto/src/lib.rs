//! # sp-crypto
//!
//! Cryptographic operations for the SAML service provider library,
//! backed by `aws-lc-rs`.
//!
//! SAML 2.0 interoperability pins the algorithm set:
//!
//! - RSA PKCS#1 v1.5 signatures with SHA-256/384/512; SHA-1 signatures are
//!   verified (legacy IdPs still emit them) but never created.
//! - SHA-1 digests remain available because artifact SourceIDs and the
//!   default XML-DSig digest method require them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod digest;
pub mod pem;
pub mod random;
pub mod rsa;

pub use digest::{sha1, sha256, sha384, sha512, DigestAlgorithm};
pub use pem::pem_to_der;
pub use random::{message_id, random_bytes};
pub use rsa::{rsa_sign, rsa_verify, CryptoError, RsaAlgorithm};
