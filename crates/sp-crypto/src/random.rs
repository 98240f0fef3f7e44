//! Secure random generation for protocol identifiers.

use rand::Rng;

/// Generates `len` cryptographically secure random bytes.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes[..]);
    bytes
}

/// Generates a SAML message identifier.
///
/// 160 bits of randomness, hex encoded, with a leading letter so the value
/// is a valid XML `NCName` (attribute values of type `xs:ID` may not start
/// with a digit).
#[must_use]
pub fn message_id() -> String {
    let mut rng = rand::rng();
    let letter = (b'a' + rng.random_range(0..6u8)) as char;
    format!("{letter}{}", hex::encode(random_bytes(20)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_length() {
        assert_eq!(random_bytes(20).len(), 20);
        assert_ne!(random_bytes(16), random_bytes(16));
    }

    #[test]
    fn message_id_is_ncname() {
        let id = message_id();
        assert_eq!(id.len(), 41);
        assert!(id.chars().next().unwrap().is_ascii_alphabetic());
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() || c.is_ascii_alphabetic()));
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(message_id(), message_id());
    }
}
