//! Controller entry points consumed by the host.
//!
//! One `SpController` instance serves every inbound request; it holds the
//! immutable metadata snapshot, the correlation cache, and the SOAP back
//! channel. Each entry point decodes, validates, and either hands a
//! validated message to the host or emits the outbound side effect
//! through the host response.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactResolver;
use crate::bindings::{BackChannel, HttpPostBinding, HttpRedirectBinding, SamlMessageType};
use crate::builder::{self, AuthnRequestParams};
use crate::codec;
use crate::correlation::{PendingKind, RequestCorrelationCache};
use crate::error::{SpError, SpResult};
use crate::host::{HostRequest, HostResponse};
use crate::metadata::{IdpDescriptor, MetadataStore};
use crate::parser::{AuthnResponse, LogoutRequest, LogoutResponse};
use crate::signature::{DigestMethod, RedirectSigner, SignatureAlgorithm, XmlSigner};
use crate::types::{NameId, SamlBinding};
use crate::validator::{
    self, LogoutTransport, ResponseOrigin, ValidatedAuthnResponse,
};

/// Parameters for sending a LogoutRequest.
#[derive(Debug, Clone)]
pub struct LogoutParams {
    /// The binding to deliver the request over.
    pub binding: SamlBinding,
    /// The subject to log out.
    pub name_id: NameId,
    /// The IdP session index to terminate.
    pub session_index: String,
    /// Application RelayState to round-trip through the IdP.
    pub relay_state: Option<String>,
}

/// What sending a LogoutRequest produced.
#[derive(Debug)]
pub enum LogoutOutcome {
    /// The request went out through the browser; the LogoutResponse will
    /// arrive on a later request.
    Emitted {
        /// The issued LogoutRequest ID.
        request_id: String,
    },
    /// SOAP delivery returned the LogoutResponse synchronously, already
    /// validated.
    Completed(LogoutResponse),
}

/// The service provider controller.
pub struct SpController {
    store: Arc<MetadataStore>,
    cache: Arc<RequestCorrelationCache>,
    back_channel: BackChannel,
    resolver: ArtifactResolver,
}

impl SpController {
    /// Creates a controller over a metadata snapshot with default cache
    /// and back-channel settings.
    pub fn new(store: Arc<MetadataStore>) -> SpResult<Self> {
        Self::with_parts(
            store,
            Arc::new(RequestCorrelationCache::default()),
            BackChannel::new(crate::bindings::DEFAULT_BACK_CHANNEL_TIMEOUT)?,
        )
    }

    /// Creates a controller with explicit cache and back channel.
    pub fn with_parts(
        store: Arc<MetadataStore>,
        cache: Arc<RequestCorrelationCache>,
        back_channel: BackChannel,
    ) -> SpResult<Self> {
        Ok(Self {
            store,
            cache,
            resolver: ArtifactResolver::new(back_channel.clone()),
            back_channel,
        })
    }

    /// The metadata snapshot this controller serves.
    #[must_use]
    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// The correlation cache.
    #[must_use]
    pub fn cache(&self) -> &RequestCorrelationCache {
        &self.cache
    }

    fn idp(&self, entity_id: &str) -> SpResult<&IdpDescriptor> {
        self.store.idp(entity_id).ok_or_else(|| {
            SpError::Configuration(format!("IdP '{entity_id}' is not configured"))
        })
    }

    fn check_relay_state(&self, relay_state: Option<&str>) -> SpResult<()> {
        if let Some(relay_state) = relay_state {
            if !self.store.config().relay_state_allowed(relay_state) {
                return Err(SpError::RelayStateRejected(relay_state.to_string()));
            }
        }
        Ok(())
    }

    fn signature_algorithm(&self) -> SpResult<SignatureAlgorithm> {
        let uri = &self.store.config().signature_method;
        SignatureAlgorithm::from_uri(uri)
            .ok_or_else(|| SpError::Configuration(format!("unknown signature method '{uri}'")))
    }

    fn xml_signer(&self) -> SpResult<XmlSigner> {
        let key = self.store.signing_key()?;
        let digest_uri = &self.store.config().digest_method;
        let digest = DigestMethod::from_uri(digest_uri)
            .ok_or_else(|| SpError::Configuration(format!("unknown digest method '{digest_uri}'")))?;
        Ok(XmlSigner::from_key_entry(key)
            .with_algorithm(self.signature_algorithm()?)
            .with_digest(digest))
    }

    /// Builds and emits an AuthnRequest toward an IdP. Returns the issued
    /// request ID after recording it for correlation.
    pub fn send_authn_request(
        &self,
        request: &dyn HostRequest,
        response: &mut dyn HostResponse,
        idp_entity_id: &str,
        params: &AuthnRequestParams,
    ) -> SpResult<String> {
        self.check_relay_state(params.relay_state.as_deref())?;
        let idp = self.idp(idp_entity_id)?;

        let binding = params.request_binding.unwrap_or(SamlBinding::HttpRedirect);
        let built = builder::build_authn_request(&self.store, idp, params)?;
        let must_sign =
            idp.want_authn_requests_signed || self.store.sp().authn_requests_signed;
        let relay_state = params.relay_state.as_deref();

        match binding {
            SamlBinding::HttpRedirect => {
                // The builder already required this endpoint to exist.
                let destination = idp.sso_location(binding).ok_or_else(|| {
                    SpError::Configuration(format!(
                        "IdP '{idp_entity_id}' has no redirect single sign-on endpoint"
                    ))
                })?;
                let url = if must_sign {
                    let algorithm = self.signature_algorithm()?;
                    let canonical = HttpRedirectBinding::canonical_query(
                        &built.xml,
                        relay_state,
                        Some(algorithm.uri()),
                        SamlMessageType::Request,
                    )?;
                    let key = self.store.signing_key()?;
                    let signature =
                        RedirectSigner::sign(&key.private_key_der, &canonical, algorithm)?;
                    HttpRedirectBinding::encode_signed(
                        &built.xml,
                        destination,
                        relay_state,
                        algorithm.uri(),
                        &signature,
                        SamlMessageType::Request,
                    )?
                } else {
                    HttpRedirectBinding::encode_request(&built.xml, destination, relay_state)?
                };
                response.redirect(&url);
            }
            SamlBinding::HttpPost => {
                let xml = if must_sign {
                    self.xml_signer()?.sign(&built.xml, &built.id)?
                } else {
                    built.xml.clone()
                };
                let destination = idp.sso_location(binding).ok_or_else(|| {
                    SpError::Configuration(format!(
                        "IdP '{idp_entity_id}' has no POST single sign-on endpoint"
                    ))
                })?;
                let html = HttpPostBinding::encode_request(&xml, destination, relay_state);
                response.write(&html, "text/html");
            }
            SamlBinding::HttpArtifact | SamlBinding::Soap => {
                return Err(SpError::Configuration(format!(
                    "AuthnRequests cannot be sent over {}",
                    binding.uri()
                )));
            }
        }

        if let Some(bucket) = request.user_bucket() {
            self.cache.add(&bucket, built.id.clone(), PendingKind::Authn);
        }
        response.end();

        tracing::info!(idp = idp_entity_id, id = %built.id, "AuthnRequest sent");
        Ok(built.id)
    }

    /// Consumes an inbound AuthnResponse (`SAMLResponse`) or artifact
    /// (`SAMLart`) and returns the validated response. Exactly one of the
    /// two parameters must be present.
    pub async fn get_authn_response(
        &self,
        request: &dyn HostRequest,
        cancel: Option<&CancellationToken>,
    ) -> SpResult<ValidatedAuthnResponse> {
        let saml_response = request.query_param("SAMLResponse");
        let saml_art = request.query_param("SAMLart");
        let bucket = request.user_bucket();

        match (saml_response, saml_art) {
            (Some(_), Some(_)) => Err(SpError::MalformedMessage(
                "both SAMLResponse and SAMLart present".to_string(),
            )),
            (None, None) => Err(SpError::MalformedMessage(
                "neither SAMLResponse nor SAMLart present".to_string(),
            )),
            (Some(encoded), None) => {
                let xml = codec::base64_decode_to_string(&encoded)?;
                let response = AuthnResponse::parse(xml)?;
                validator::validate_authn_response(
                    &self.store,
                    &self.cache,
                    bucket.as_deref(),
                    None,
                    &response,
                    ResponseOrigin::Post,
                )
                .map_err(|e| attach_xml(e, response.raw_xml()))
            }
            (None, Some(artifact)) => {
                let artifact_response =
                    self.resolver.resolve(&self.store, &artifact, cancel).await?;
                let response = artifact_response.response()?;
                validator::validate_authn_response(
                    &self.store,
                    &self.cache,
                    bucket.as_deref(),
                    Some(&artifact_response),
                    &response,
                    ResponseOrigin::Artifact,
                )
                .map_err(|e| attach_xml(e, artifact_response.raw_xml()))
            }
        }
    }

    /// Builds and sends a LogoutRequest. Browser bindings emit through
    /// the host response and return the issued ID; SOAP performs the
    /// exchange synchronously and returns the validated LogoutResponse.
    pub async fn send_logout_request(
        &self,
        request: &dyn HostRequest,
        response: &mut dyn HostResponse,
        idp_entity_id: &str,
        params: &LogoutParams,
        cancel: Option<&CancellationToken>,
    ) -> SpResult<LogoutOutcome> {
        self.check_relay_state(params.relay_state.as_deref())?;
        let idp = self.idp(idp_entity_id)?;

        let built = builder::build_logout_request(
            &self.store,
            idp,
            params.binding,
            &params.name_id,
            &params.session_index,
        )?;
        let must_sign = idp.want_logout_request_signed;
        let relay_state = params.relay_state.as_deref();
        let bucket = request.user_bucket();

        match params.binding {
            SamlBinding::HttpRedirect => {
                let destination = idp
                    .slo_service(params.binding)
                    .map(|e| e.location.clone())
                    .ok_or_else(|| {
                        SpError::Configuration(format!(
                            "IdP '{idp_entity_id}' has no redirect single logout endpoint"
                        ))
                    })?;
                let url = if must_sign {
                    let algorithm = self.signature_algorithm()?;
                    let canonical = HttpRedirectBinding::canonical_query(
                        &built.xml,
                        relay_state,
                        Some(algorithm.uri()),
                        SamlMessageType::Request,
                    )?;
                    let key = self.store.signing_key()?;
                    let signature =
                        RedirectSigner::sign(&key.private_key_der, &canonical, algorithm)?;
                    HttpRedirectBinding::encode_signed(
                        &built.xml,
                        &destination,
                        relay_state,
                        algorithm.uri(),
                        &signature,
                        SamlMessageType::Request,
                    )?
                } else {
                    HttpRedirectBinding::encode_request(&built.xml, &destination, relay_state)?
                };
                response.redirect(&url);
                response.end();
            }
            SamlBinding::HttpPost => {
                let xml = if must_sign {
                    self.xml_signer()?.sign(&built.xml, &built.id)?
                } else {
                    built.xml.clone()
                };
                let destination = idp
                    .slo_service(params.binding)
                    .map(|e| e.location.as_str())
                    .ok_or_else(|| {
                        SpError::Configuration(format!(
                            "IdP '{idp_entity_id}' has no POST single logout endpoint"
                        ))
                    })?;
                let html = HttpPostBinding::encode_request(&xml, destination, relay_state);
                response.write(&html, "text/html");
                response.end();
            }
            SamlBinding::Soap => {
                let xml = if must_sign {
                    self.xml_signer()?.sign(&built.xml, &built.id)?
                } else {
                    built.xml.clone()
                };
                let destination = idp
                    .slo_service(params.binding)
                    .map(|e| e.location.clone())
                    .ok_or_else(|| {
                        SpError::Configuration(format!(
                            "IdP '{idp_entity_id}' has no SOAP single logout endpoint"
                        ))
                    })?;

                if let Some(bucket) = &bucket {
                    self.cache.add(bucket, built.id.clone(), PendingKind::Logout);
                }

                let envelope = self
                    .back_channel
                    .exchange(&destination, &xml, cancel)
                    .await?;
                let response_xml = codec::soap_body_child(&envelope, "LogoutResponse")?;
                let logout_response = LogoutResponse::parse(response_xml)?;
                validator::validate_logout_response(
                    &self.store,
                    &self.cache,
                    bucket.as_deref(),
                    &logout_response,
                    &LogoutTransport::Soap,
                )
                .map_err(|e| attach_xml(e, logout_response.raw_xml()))?;

                tracing::info!(idp = idp_entity_id, id = %built.id, "SOAP logout completed");
                return Ok(LogoutOutcome::Completed(logout_response));
            }
            SamlBinding::HttpArtifact => {
                return Err(SpError::Configuration(
                    "LogoutRequests cannot be sent over the artifact binding".to_string(),
                ));
            }
        }

        if let Some(bucket) = &bucket {
            self.cache.add(bucket, built.id.clone(), PendingKind::Logout);
        }

        tracing::info!(idp = idp_entity_id, id = %built.id, "LogoutRequest sent");
        Ok(LogoutOutcome::Emitted {
            request_id: built.id,
        })
    }

    /// Consumes an inbound LogoutRequest (IdP-initiated logout) and
    /// returns it validated. The host terminates its session and then
    /// answers with [`Self::send_logout_response`].
    pub fn get_logout_request(&self, request: &dyn HostRequest) -> SpResult<LogoutRequest> {
        let encoded = request.query_param("SAMLRequest").ok_or_else(|| {
            SpError::MalformedMessage("no SAMLRequest parameter".to_string())
        })?;

        let (xml, transport) = if request.method().eq_ignore_ascii_case("GET") {
            let decoded = HttpRedirectBinding::decode(Some(&encoded), None, None)?;
            (
                decoded.xml,
                LogoutTransport::Redirect {
                    raw_query: request.raw_query(),
                },
            )
        } else {
            let decoded = HttpPostBinding::decode(Some(&encoded), None, None)?;
            (decoded.xml, LogoutTransport::Post)
        };

        let logout_request = LogoutRequest::parse(xml)?;
        validator::validate_logout_request(&self.store, &logout_request, &transport)
            .map_err(|e| attach_xml(e, logout_request.raw_xml()))?;
        Ok(logout_request)
    }

    /// Consumes an inbound LogoutResponse answering an earlier
    /// LogoutRequest of ours, and returns it validated.
    pub fn get_logout_response(&self, request: &dyn HostRequest) -> SpResult<LogoutResponse> {
        let encoded = request.query_param("SAMLResponse").ok_or_else(|| {
            SpError::MalformedMessage("no SAMLResponse parameter".to_string())
        })?;
        let bucket = request.user_bucket();

        let (xml, transport) = if request.method().eq_ignore_ascii_case("GET") {
            let decoded = HttpRedirectBinding::decode(None, Some(&encoded), None)?;
            (
                decoded.xml,
                LogoutTransport::Redirect {
                    raw_query: request.raw_query(),
                },
            )
        } else {
            let decoded = HttpPostBinding::decode(None, Some(&encoded), None)?;
            (decoded.xml, LogoutTransport::Post)
        };

        let logout_response = LogoutResponse::parse(xml)?;
        validator::validate_logout_response(
            &self.store,
            &self.cache,
            bucket.as_deref(),
            &logout_response,
            &transport,
        )
        .map_err(|e| attach_xml(e, logout_response.raw_xml()))?;
        Ok(logout_response)
    }

    /// Builds and emits a LogoutResponse answering an IdP-initiated
    /// LogoutRequest.
    pub fn send_logout_response(
        &self,
        response: &mut dyn HostResponse,
        idp_entity_id: &str,
        in_response_to: &str,
        binding: SamlBinding,
        relay_state: Option<&str>,
    ) -> SpResult<()> {
        self.check_relay_state(relay_state)?;
        let idp = self.idp(idp_entity_id)?;
        let built = builder::build_logout_response(&self.store, idp, binding, in_response_to)?;
        let must_sign = idp.want_logout_response_signed;

        let slo = idp.slo_service(binding).ok_or_else(|| {
            SpError::Configuration(format!(
                "IdP '{idp_entity_id}' has no single logout endpoint for {}",
                binding.uri()
            ))
        })?;
        let destination = slo
            .response_location
            .clone()
            .unwrap_or_else(|| slo.location.clone());

        match binding {
            SamlBinding::HttpRedirect => {
                let url = if must_sign {
                    let algorithm = self.signature_algorithm()?;
                    let canonical = HttpRedirectBinding::canonical_query(
                        &built.xml,
                        relay_state,
                        Some(algorithm.uri()),
                        SamlMessageType::Response,
                    )?;
                    let key = self.store.signing_key()?;
                    let signature =
                        RedirectSigner::sign(&key.private_key_der, &canonical, algorithm)?;
                    HttpRedirectBinding::encode_signed(
                        &built.xml,
                        &destination,
                        relay_state,
                        algorithm.uri(),
                        &signature,
                        SamlMessageType::Response,
                    )?
                } else {
                    HttpRedirectBinding::encode_response(&built.xml, &destination, relay_state)?
                };
                response.redirect(&url);
            }
            SamlBinding::HttpPost => {
                let xml = if must_sign {
                    self.xml_signer()?.sign(&built.xml, &built.id)?
                } else {
                    built.xml
                };
                let html = HttpPostBinding::encode_response(&xml, &destination, relay_state);
                response.write(&html, "text/html");
            }
            SamlBinding::HttpArtifact | SamlBinding::Soap => {
                return Err(SpError::Configuration(format!(
                    "LogoutResponses cannot be emitted over {} here",
                    binding.uri()
                )));
            }
        }
        response.end();

        tracing::info!(idp = idp_entity_id, in_response_to, "LogoutResponse sent");
        Ok(())
    }

    /// Builds a SOAP-wrapped LogoutResponse body for a logout request
    /// that arrived over the SOAP binding. The host writes it back as
    /// `text/xml`.
    pub fn send_soap_logout_response(
        &self,
        idp_entity_id: &str,
        in_response_to: &str,
    ) -> SpResult<String> {
        let idp = self.idp(idp_entity_id)?;
        let binding = if idp.slo_service(SamlBinding::Soap).is_some() {
            SamlBinding::Soap
        } else {
            SamlBinding::HttpRedirect
        };
        let built = builder::build_logout_response(&self.store, idp, binding, in_response_to)?;

        let xml = if idp.want_logout_response_signed {
            self.xml_signer()?.sign(&built.xml, &built.id)?
        } else {
            built.xml
        };

        Ok(codec::soap_wrap(&xml))
    }

    /// Generates the SP metadata document, optionally signed with the
    /// configured alias. Signing without a configured alias fails.
    pub fn exportable_metadata(&self, sign_metadata: bool) -> SpResult<String> {
        if !sign_metadata {
            return Ok(self.store.sp_metadata_document(None));
        }

        let key = self.store.signing_key()?;
        // The signature's reference ID is freshly generated per export.
        let document_id = sp_crypto::message_id();
        let document = self.store.sp_metadata_document(Some(&document_id));
        let digest_uri = &self.store.config().digest_method;
        let digest = DigestMethod::from_uri(digest_uri).ok_or_else(|| {
            SpError::Configuration(format!("unknown digest method '{digest_uri}'"))
        })?;

        XmlSigner::from_key_entry(key)
            .with_algorithm(self.signature_algorithm()?)
            .with_digest(digest)
            .sign(&document, &document_id)
    }
}

/// Surfaces the raw message XML to the host's log sink alongside the
/// failure, then hands the error back unchanged.
fn attach_xml(error: SpError, raw_xml: &str) -> SpError {
    tracing::error!(error = %error, raw_message = raw_xml, "SAML validation failed");
    error
}
