//! Response validation.
//!
//! A linear state machine over parsed messages. The step order is fixed
//! and short-circuits on the first failure, because a failure's meaning
//! depends on which check failed first: an audience mismatch on an
//! unsigned response must still surface as a missing signature. The
//! correlation entry is removed in a final clean-up step regardless of
//! the outcome.

use chrono::{DateTime, Duration, Utc};

use crate::correlation::RequestCorrelationCache;
use crate::error::{SpError, SpResult};
use crate::metadata::{CertificateData, IdpDescriptor, MetadataStore};
use crate::parser::{ArtifactResponse, Attribute, AuthnResponse, LogoutRequest, LogoutResponse};
use crate::signature::{RedirectSigner, XmlVerifier};
use crate::types::{status_codes, NameId};

/// How an AuthnResponse reached the SP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOrigin {
    /// Delivered by the browser over HTTP-POST.
    Post,
    /// Dereferenced from an artifact over the SOAP back channel.
    Artifact,
}

/// How a logout message reached the SP.
#[derive(Debug, Clone, Copy)]
pub enum LogoutTransport<'a> {
    /// HTTP-POST form delivery; signatures are enveloped in the XML.
    Post,
    /// HTTP-Redirect delivery; the signature covers the raw query string.
    Redirect {
        /// The raw, still percent-encoded query string.
        raw_query: &'a str,
    },
    /// SOAP back channel; signatures are enveloped in the XML.
    Soap,
}

/// The validated view of an AuthnResponse handed to the host.
#[derive(Debug, Clone)]
pub struct ValidatedAuthnResponse {
    /// The IdP entity ID.
    pub issuer: String,
    /// The status code URI (always Success after validation).
    pub status_code: String,
    /// The AuthnRequest ID this response answers, absent for
    /// IdP-initiated SSO.
    pub in_response_to: Option<String>,
    /// The authenticated subject.
    pub name_id: NameId,
    /// The IdP session index.
    pub session_index: Option<String>,
    /// The authentication context class reference.
    pub authn_context_class_ref: Option<String>,
    /// When the subject authenticated.
    pub authn_instant: Option<DateTime<Utc>>,
    /// The assertion validity window start.
    pub not_before: DateTime<Utc>,
    /// The assertion validity window end.
    pub not_on_or_after: DateTime<Utc>,
    /// The audiences the assertion is addressed to.
    pub audiences: Vec<String>,
    /// The assertion's attributes.
    pub attributes: Vec<Attribute>,
    /// The raw response XML, for the host's log sink.
    pub raw_xml: String,
}

fn idp_signing_certificate<'a>(idp: &'a IdpDescriptor) -> SpResult<&'a CertificateData> {
    idp.signing_certificate.as_ref().ok_or_else(|| {
        SpError::Configuration(format!(
            "IdP '{}' has no signing certificate in metadata",
            idp.entity_id
        ))
    })
}

/// Validates an AuthnResponse, consuming its correlation entry.
///
/// `artifact_response` carries the outer message when the response was
/// dereferenced from an artifact. `user_bucket` keys the correlation
/// cache; passing `None` disables InResponseTo enforcement.
pub fn validate_authn_response(
    store: &MetadataStore,
    cache: &RequestCorrelationCache,
    user_bucket: Option<&str>,
    artifact_response: Option<&ArtifactResponse>,
    response: &AuthnResponse,
    origin: ResponseOrigin,
) -> SpResult<ValidatedAuthnResponse> {
    let in_response_to = response.in_response_to();

    let result = run_authn_checks(
        store,
        cache,
        user_bucket,
        artifact_response,
        response,
        origin,
        in_response_to.as_deref(),
    );

    // Clean-up runs on success and on failure alike; a replayed response
    // must not find the entry a failed first attempt left behind.
    if let (Some(bucket), Some(id)) = (user_bucket, in_response_to.as_deref()) {
        let removed = cache.remove(bucket, id);
        tracing::debug!(id, removed, "correlation entry cleaned up");
    }

    result
}

#[allow(clippy::too_many_lines)]
fn run_authn_checks(
    store: &MetadataStore,
    cache: &RequestCorrelationCache,
    user_bucket: Option<&str>,
    artifact_response: Option<&ArtifactResponse>,
    response: &AuthnResponse,
    origin: ResponseOrigin,
    in_response_to: Option<&str>,
) -> SpResult<ValidatedAuthnResponse> {
    let config = store.config();
    let sp = store.sp();
    let issuer = response.issuer()?;

    // 1. Signature gate. Presence is checked against policy before
    //    anything else; the strongest available signature is then
    //    verified against the issuer's metadata certificate.
    let artifact_signature = artifact_response.and_then(ArtifactResponse::signature);
    let response_signature = response.response_signature();
    let assertion_signature = response.assertion_signature();

    if origin == ResponseOrigin::Artifact
        && config.want_artifact_response_signed
        && artifact_signature.is_none()
    {
        return Err(SpError::SignatureMissing(
            "policy requires a signed ArtifactResponse".to_string(),
        ));
    }
    if origin == ResponseOrigin::Post
        && config.want_post_response_signed
        && response_signature.is_none()
    {
        return Err(SpError::SignatureMissing(
            "policy requires a signed Response".to_string(),
        ));
    }
    if sp.want_assertions_signed
        && artifact_signature.is_none()
        && response_signature.is_none()
        && assertion_signature.is_none()
    {
        return Err(SpError::SignatureMissing(
            "policy requires a signed assertion".to_string(),
        ));
    }

    // Strongest first: ArtifactResponse > Response > Assertion.
    let chosen = if let (Some(outer), Some(signature)) = (artifact_response, &artifact_signature)
    {
        Some((outer.raw_xml().to_string(), signature.clone(), outer.id()?))
    } else if let Some(signature) = &response_signature {
        Some((
            response.raw_xml().to_string(),
            signature.clone(),
            response.id()?,
        ))
    } else if let Some(signature) = &assertion_signature {
        Some((
            response.raw_xml().to_string(),
            signature.clone(),
            response.assertion_id()?,
        ))
    } else {
        None
    };

    if let Some((document, signature_xml, reference_id)) = chosen {
        let idp = store
            .idp(&issuer)
            .ok_or_else(|| SpError::UnknownIssuer(issuer.clone()))?;
        let certificate = idp_signing_certificate(idp)?;
        XmlVerifier::new(certificate.der.clone()).verify(
            &document,
            &signature_xml,
            &reference_id,
        )?;
        tracing::debug!(issuer = %issuer, reference = %reference_id, "response signature verified");
    }

    // 2. Issuer known.
    if store.idp(&issuer).is_none() {
        return Err(SpError::UnknownIssuer(issuer));
    }

    // 3. Status.
    let status_code = response.status_code()?;
    if status_code != status_codes::SUCCESS {
        return Err(SpError::ResponderFailure { status_code });
    }

    // 4. Time window.
    let now = Utc::now();
    let skew = Duration::seconds(config.assertion_time_skew);
    let not_before = response.condition_not_before()?;
    let not_on_or_after = response.condition_not_on_or_after()?;
    if now < not_before - skew || now >= not_on_or_after + skew {
        return Err(SpError::AssertionExpiredOrNotYetValid);
    }

    // 5. Audience.
    let audiences = response.condition_audiences()?;
    if !audiences.iter().any(|a| *a == sp.entity_id) {
        return Err(SpError::AudienceMismatch {
            expected: sp.entity_id.clone(),
        });
    }

    // 6. Circle of trust.
    if !store.shares_circle_of_trust(&issuer) {
        return Err(SpError::NotInCircleOfTrust {
            sp: sp.entity_id.clone(),
            issuer,
        });
    }

    // 7. InResponseTo. Absence is only legitimate for IdP-initiated SSO.
    if let (Some(bucket), Some(id)) = (user_bucket, in_response_to) {
        if !cache.contains(bucket, id) {
            return Err(SpError::CorrelationMismatch(format!(
                "InResponseTo '{id}' is not an outstanding request"
            )));
        }
    }

    Ok(ValidatedAuthnResponse {
        issuer,
        status_code,
        in_response_to: in_response_to.map(ToString::to_string),
        name_id: response.subject_name_id()?,
        session_index: response.session_index(),
        authn_context_class_ref: response.authn_context_class_ref(),
        authn_instant: response.authn_instant(),
        not_before,
        not_on_or_after,
        audiences,
        attributes: response.attribute_statements()?,
        raw_xml: response.raw_xml().to_string(),
    })
}

/// Validates an incoming LogoutRequest (IdP-initiated logout).
pub fn validate_logout_request(
    store: &MetadataStore,
    request: &LogoutRequest,
    transport: &LogoutTransport<'_>,
) -> SpResult<()> {
    let config = store.config();
    let issuer = request.issuer()?;

    // Signature gate.
    match transport {
        LogoutTransport::Redirect { raw_query } => {
            if config.want_logout_request_signed {
                let idp = store
                    .idp(&issuer)
                    .ok_or_else(|| SpError::UnknownIssuer(issuer.clone()))?;
                let certificate = idp_signing_certificate(idp)?;
                RedirectSigner::verify(&certificate.der, raw_query)?;
            }
        }
        LogoutTransport::Post | LogoutTransport::Soap => {
            let signature = request.signature();
            if config.want_logout_request_signed && signature.is_none() {
                return Err(SpError::SignatureMissing(
                    "policy requires a signed LogoutRequest".to_string(),
                ));
            }
            if let Some(signature_xml) = signature {
                let idp = store
                    .idp(&issuer)
                    .ok_or_else(|| SpError::UnknownIssuer(issuer.clone()))?;
                let certificate = idp_signing_certificate(idp)?;
                XmlVerifier::new(certificate.der.clone()).verify(
                    request.raw_xml(),
                    &signature_xml,
                    &request.id()?,
                )?;
            }
        }
    }

    if store.idp(&issuer).is_none() {
        return Err(SpError::UnknownIssuer(issuer));
    }

    if !store.shares_circle_of_trust(&issuer) {
        return Err(SpError::NotInCircleOfTrust {
            sp: store.sp().entity_id.clone(),
            issuer,
        });
    }

    // An expired request must not terminate a session.
    if let Some(not_on_or_after) = request.not_on_or_after() {
        let skew = Duration::seconds(config.assertion_time_skew);
        if Utc::now() >= not_on_or_after + skew {
            return Err(SpError::AssertionExpiredOrNotYetValid);
        }
    }

    Ok(())
}

/// Validates an incoming LogoutResponse, consuming its correlation entry.
pub fn validate_logout_response(
    store: &MetadataStore,
    cache: &RequestCorrelationCache,
    user_bucket: Option<&str>,
    response: &LogoutResponse,
    transport: &LogoutTransport<'_>,
) -> SpResult<()> {
    let in_response_to = response.in_response_to();

    let result = run_logout_response_checks(
        store,
        cache,
        user_bucket,
        response,
        transport,
        in_response_to.as_deref(),
    );

    if let (Some(bucket), Some(id)) = (user_bucket, in_response_to.as_deref()) {
        let removed = cache.remove(bucket, id);
        tracing::debug!(id, removed, "correlation entry cleaned up");
    }

    result
}

fn run_logout_response_checks(
    store: &MetadataStore,
    cache: &RequestCorrelationCache,
    user_bucket: Option<&str>,
    response: &LogoutResponse,
    transport: &LogoutTransport<'_>,
    in_response_to: Option<&str>,
) -> SpResult<()> {
    let config = store.config();
    let issuer = response.issuer()?;

    // Signature gate.
    match transport {
        LogoutTransport::Redirect { raw_query } => {
            if config.want_logout_response_signed {
                let idp = store
                    .idp(&issuer)
                    .ok_or_else(|| SpError::UnknownIssuer(issuer.clone()))?;
                let certificate = idp_signing_certificate(idp)?;
                RedirectSigner::verify(&certificate.der, raw_query)?;
            }
        }
        LogoutTransport::Post | LogoutTransport::Soap => {
            let signature = response.signature();
            if config.want_logout_response_signed && signature.is_none() {
                return Err(SpError::SignatureMissing(
                    "policy requires a signed LogoutResponse".to_string(),
                ));
            }
            if let Some(signature_xml) = signature {
                let idp = store
                    .idp(&issuer)
                    .ok_or_else(|| SpError::UnknownIssuer(issuer.clone()))?;
                let certificate = idp_signing_certificate(idp)?;
                XmlVerifier::new(certificate.der.clone()).verify(
                    response.raw_xml(),
                    &signature_xml,
                    &response.id()?,
                )?;
            }
        }
    }

    if store.idp(&issuer).is_none() {
        return Err(SpError::UnknownIssuer(issuer));
    }

    let status_code = response.status_code()?;
    if status_code != status_codes::SUCCESS {
        return Err(SpError::ResponderFailure { status_code });
    }

    if !store.shares_circle_of_trust(&issuer) {
        return Err(SpError::NotInCircleOfTrust {
            sp: store.sp().entity_id.clone(),
            issuer,
        });
    }

    if let (Some(bucket), Some(id)) = (user_bucket, in_response_to) {
        if !cache.contains(bucket, id) {
            return Err(SpError::CorrelationMismatch(format!(
                "InResponseTo '{id}' is not an outstanding logout request"
            )));
        }
    }

    Ok(())
}
