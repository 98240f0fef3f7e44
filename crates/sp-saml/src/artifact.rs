//! SAML artifact handling and back-channel resolution.
//!
//! An artifact is 44 bytes, base64-encoded:
//! `TypeCode(2) || EndpointIndex(2) || SourceID(20) || MessageHandle(20)`.
//! The SourceID is SHA-1 of the issuing IdP's entity ID; the wire format
//! carries raw bytes, only the internal lookup table keys on uppercase hex.

use tokio_util::sync::CancellationToken;

use crate::bindings::BackChannel;
use crate::builder;
use crate::codec;
use crate::error::{SpError, SpResult};
use crate::metadata::{IdpDescriptor, MetadataStore};
use crate::parser::ArtifactResponse;
use crate::signature::XmlSigner;
use crate::types::status_codes;

/// The type code of a SAML 2.0 artifact.
pub const ARTIFACT_TYPE_CODE: u16 = 0x0004;

/// A parsed SAML artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// The artifact type code, `0x0004`.
    pub type_code: u16,
    /// The artifact resolution endpoint index.
    pub endpoint_index: u16,
    /// SHA-1 of the source entity ID.
    pub source_id: [u8; 20],
    /// The opaque message handle.
    pub message_handle: [u8; 20],
}

impl Artifact {
    /// Parses a base64 artifact.
    pub fn parse(artifact_b64: &str) -> SpResult<Self> {
        let bytes = codec::base64_decode(artifact_b64.trim())?;
        if bytes.len() != 44 {
            return Err(SpError::MalformedMessage(format!(
                "artifact is {} bytes, expected 44",
                bytes.len()
            )));
        }
        let type_code = u16::from_be_bytes([bytes[0], bytes[1]]);
        if type_code != ARTIFACT_TYPE_CODE {
            return Err(SpError::MalformedMessage(format!(
                "unsupported artifact type code {type_code:#06x}"
            )));
        }

        let mut source_id = [0u8; 20];
        source_id.copy_from_slice(&bytes[4..24]);
        let mut message_handle = [0u8; 20];
        message_handle.copy_from_slice(&bytes[24..44]);

        Ok(Self {
            type_code,
            endpoint_index: u16::from_be_bytes([bytes[2], bytes[3]]),
            source_id,
            message_handle,
        })
    }

    /// Encodes the artifact to its base64 wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(44);
        bytes.extend_from_slice(&self.type_code.to_be_bytes());
        bytes.extend_from_slice(&self.endpoint_index.to_be_bytes());
        bytes.extend_from_slice(&self.source_id);
        bytes.extend_from_slice(&self.message_handle);
        codec::base64_encode(&bytes)
    }

    /// The source ID as the uppercase hex used for IdP lookup.
    #[must_use]
    pub fn source_id_hex(&self) -> String {
        hex::encode_upper(self.source_id)
    }
}

/// The uppercase-hex SHA-1 SourceID of an entity ID.
#[must_use]
pub fn source_id_hex(entity_id: &str) -> String {
    hex::encode_upper(sp_crypto::sha1(entity_id.as_bytes()))
}

/// Finds the IdP whose entity ID hashes to the artifact's SourceID.
pub fn find_issuer<'a>(
    store: &'a MetadataStore,
    artifact: &Artifact,
) -> SpResult<&'a IdpDescriptor> {
    let wanted = artifact.source_id_hex();
    store
        .idps()
        .values()
        .find(|idp| source_id_hex(&idp.entity_id) == wanted)
        .ok_or_else(|| {
            SpError::UnknownIssuer(format!("no IdP matches artifact SourceID {wanted}"))
        })
}

/// Dereferences artifacts over the SOAP back channel.
pub struct ArtifactResolver {
    back_channel: BackChannel,
}

impl ArtifactResolver {
    /// Creates a resolver over the given back channel.
    #[must_use]
    pub fn new(back_channel: BackChannel) -> Self {
        Self { back_channel }
    }

    /// Resolves an artifact to the ArtifactResponse it references.
    ///
    /// Builds an ArtifactResolve (signed when the IdP requires it), POSTs
    /// it to the IdP's artifact resolution service, and unwraps the SOAP
    /// response. The outer `InResponseTo` must match the ArtifactResolve
    /// ID.
    pub async fn resolve(
        &self,
        store: &MetadataStore,
        artifact_b64: &str,
        cancel: Option<&CancellationToken>,
    ) -> SpResult<ArtifactResponse> {
        let artifact = Artifact::parse(artifact_b64)?;
        let idp = find_issuer(store, &artifact)?;

        let endpoint = idp.artifact_resolution_location().ok_or_else(|| {
            SpError::Configuration(format!(
                "IdP '{}' has no artifact resolution service",
                idp.entity_id
            ))
        })?;

        let resolve =
            builder::build_artifact_resolve(&store.sp().entity_id, endpoint, artifact_b64);
        let resolve_id = resolve.id.clone();

        let body = if idp.want_artifact_resolve_signed {
            let key = store.signing_key()?;
            XmlSigner::from_key_entry(key).sign(&resolve.xml, &resolve_id)?
        } else {
            resolve.xml
        };

        tracing::debug!(idp = %idp.entity_id, endpoint, "resolving artifact");
        let envelope = self.back_channel.exchange(endpoint, &body, cancel).await?;

        let response_xml = codec::soap_body_child(&envelope, "ArtifactResponse")?;
        let artifact_response = ArtifactResponse::parse(response_xml)?;

        let in_response_to = artifact_response.in_response_to()?;
        if in_response_to != resolve_id {
            return Err(SpError::CorrelationMismatch(format!(
                "ArtifactResponse answers '{in_response_to}', expected '{resolve_id}'"
            )));
        }

        let status = artifact_response.status_code()?;
        if status != status_codes::SUCCESS {
            return Err(SpError::ResponderFailure {
                status_code: status,
            });
        }

        Ok(artifact_response)
    }
}
