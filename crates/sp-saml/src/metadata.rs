//! Metadata store: SP descriptor, IdP descriptors, circles of trust,
//! extended configuration, and signing credentials.
//!
//! The store is built once from XML documents and immutable afterwards;
//! callers share it as `Arc<MetadataStore>`. A file-watching repository
//! lives outside this crate and swaps in a freshly built store on change,
//! so readers never observe a partially updated view.

use std::collections::{HashMap, HashSet};

use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::error::{SpError, SpResult};
use crate::types::{SamlBinding, MD_NS, PASSWORD_PROTECTED_TRANSPORT, SAMLP_NS, XMLDSIG_NS};
use crate::xml;

/// An X.509 certificate as carried in metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateData {
    /// Base64 DER with all whitespace elided, the form used for
    /// certificate comparison.
    pub b64: String,
    /// Decoded DER bytes.
    pub der: Vec<u8>,
}

impl CertificateData {
    /// Builds certificate data from the text content of an
    /// `X509Certificate` element.
    pub fn from_b64(text: &str) -> SpResult<Self> {
        let b64: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let der = base64::engine::general_purpose::STANDARD
            .decode(&b64)
            .map_err(|e| SpError::Configuration(format!("invalid certificate base64: {e}")))?;
        Ok(Self { b64, der })
    }
}

/// A single protocol endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// The binding this endpoint speaks.
    pub binding: SamlBinding,
    /// The endpoint URL.
    pub location: String,
    /// Where responses go when they differ from the request location.
    pub response_location: Option<String>,
}

/// An indexed endpoint (assertion consumer or artifact resolution).
#[derive(Debug, Clone)]
pub struct IndexedEndpoint {
    /// The binding this endpoint speaks.
    pub binding: SamlBinding,
    /// The endpoint URL.
    pub location: String,
    /// The endpoint index.
    pub index: u16,
    /// Whether this endpoint is the default for its role.
    pub is_default: bool,
}

/// The service provider's own entity descriptor.
#[derive(Debug, Clone)]
pub struct SpDescriptor {
    /// The SP entity ID.
    pub entity_id: String,
    /// Whether this SP signs its authentication requests.
    pub authn_requests_signed: bool,
    /// Whether this SP requires signed assertions.
    pub want_assertions_signed: bool,
    /// Assertion consumer service endpoints.
    pub assertion_consumers: Vec<IndexedEndpoint>,
    /// Single logout service endpoints.
    pub single_logout: Vec<Endpoint>,
    /// The SP signing certificate.
    pub signing_certificate: Option<CertificateData>,
    /// The SP encryption certificate.
    pub encryption_certificate: Option<CertificateData>,
}

impl SpDescriptor {
    /// Parses an SP entity descriptor document.
    pub fn from_xml(doc: &str) -> SpResult<Self> {
        let entity_id = xml::element_attr(doc, "EntityDescriptor", "entityID")
            .ok_or_else(|| SpError::Configuration("SP metadata has no entityID".to_string()))?;
        let descriptor = xml::extract_element(doc, "SPSSODescriptor").ok_or_else(|| {
            SpError::Configuration("SP metadata has no SPSSODescriptor".to_string())
        })?;

        let roles = parse_role_descriptor(descriptor)?;

        Ok(Self {
            entity_id,
            authn_requests_signed: bool_attr(descriptor, "SPSSODescriptor", "AuthnRequestsSigned"),
            want_assertions_signed: bool_attr(descriptor, "SPSSODescriptor", "WantAssertionsSigned"),
            assertion_consumers: roles.indexed("AssertionConsumerService"),
            single_logout: roles.plain("SingleLogoutService"),
            signing_certificate: roles.signing_certificate,
            encryption_certificate: roles.encryption_certificate,
        })
    }

    /// The default assertion consumer endpoint for a binding.
    #[must_use]
    pub fn assertion_consumer(&self, binding: SamlBinding) -> Option<&IndexedEndpoint> {
        self.assertion_consumers
            .iter()
            .filter(|e| e.binding == binding)
            .max_by_key(|e| e.is_default)
    }
}

/// A remote identity provider's entity descriptor.
#[derive(Debug, Clone)]
pub struct IdpDescriptor {
    /// The IdP entity ID.
    pub entity_id: String,
    /// Whether this IdP requires signed authentication requests.
    pub want_authn_requests_signed: bool,
    /// Whether this IdP requires signed ArtifactResolve messages.
    pub want_artifact_resolve_signed: bool,
    /// Whether logout requests to this IdP must be signed.
    pub want_logout_request_signed: bool,
    /// Whether logout responses to this IdP must be signed.
    pub want_logout_response_signed: bool,
    /// Single sign-on service endpoints.
    pub single_sign_on: Vec<Endpoint>,
    /// Single logout service endpoints.
    pub single_logout: Vec<Endpoint>,
    /// Artifact resolution service endpoints.
    pub artifact_resolution: Vec<IndexedEndpoint>,
    /// The IdP signing certificate.
    pub signing_certificate: Option<CertificateData>,
}

impl IdpDescriptor {
    /// Parses an IdP entity descriptor document.
    pub fn from_xml(doc: &str) -> SpResult<Self> {
        let entity_id = xml::element_attr(doc, "EntityDescriptor", "entityID")
            .ok_or_else(|| SpError::Configuration("IdP metadata has no entityID".to_string()))?;
        let descriptor = xml::extract_element(doc, "IDPSSODescriptor").ok_or_else(|| {
            SpError::Configuration("IdP metadata has no IDPSSODescriptor".to_string())
        })?;

        let roles = parse_role_descriptor(descriptor)?;

        Ok(Self {
            entity_id,
            want_authn_requests_signed: bool_attr(
                descriptor,
                "IDPSSODescriptor",
                "WantAuthnRequestsSigned",
            ),
            want_artifact_resolve_signed: bool_attr(
                descriptor,
                "IDPSSODescriptor",
                "WantArtifactResolveSigned",
            ),
            want_logout_request_signed: bool_attr(
                descriptor,
                "IDPSSODescriptor",
                "WantLogoutRequestSigned",
            ),
            want_logout_response_signed: bool_attr(
                descriptor,
                "IDPSSODescriptor",
                "WantLogoutResponseSigned",
            ),
            single_sign_on: roles.plain("SingleSignOnService"),
            single_logout: roles.plain("SingleLogoutService"),
            artifact_resolution: roles.indexed("ArtifactResolutionService"),
            signing_certificate: roles.signing_certificate,
        })
    }

    /// The single sign-on location for a binding.
    #[must_use]
    pub fn sso_location(&self, binding: SamlBinding) -> Option<&str> {
        self.single_sign_on
            .iter()
            .find(|e| e.binding == binding)
            .map(|e| e.location.as_str())
    }

    /// The single logout endpoint for a binding.
    #[must_use]
    pub fn slo_service(&self, binding: SamlBinding) -> Option<&Endpoint> {
        self.single_logout.iter().find(|e| e.binding == binding)
    }

    /// The SOAP artifact resolution location.
    #[must_use]
    pub fn artifact_resolution_location(&self) -> Option<&str> {
        self.artifact_resolution
            .iter()
            .filter(|e| e.binding == SamlBinding::Soap)
            .min_by_key(|e| e.index)
            .map(|e| e.location.as_str())
    }
}

/// A named set of entity IDs willing to federate with each other.
#[derive(Debug, Clone)]
pub struct CircleOfTrust {
    /// The circle's name.
    pub name: String,
    /// The trusted entity IDs.
    pub members: HashSet<String>,
}

impl CircleOfTrust {
    /// Parses a circle-of-trust document:
    /// `<CircleOfTrust name="..."><TrustedEntity>id</TrustedEntity>...</CircleOfTrust>`.
    pub fn from_xml(doc: &str) -> SpResult<Self> {
        let name = xml::element_attr(doc, "CircleOfTrust", "name")
            .ok_or_else(|| SpError::Configuration("circle of trust has no name".to_string()))?;

        let mut members = HashSet::new();
        let mut from = 0;
        while let Some(pos) = xml::find_element_from(doc, "TrustedEntity", from) {
            if let Some(text) = xml::element_text_from(doc, "TrustedEntity", pos) {
                if !text.is_empty() {
                    members.insert(text);
                }
            }
            from = pos + 1;
        }

        if members.is_empty() {
            return Err(SpError::Configuration(format!(
                "circle of trust '{name}' has no trusted entities"
            )));
        }

        Ok(Self { name, members })
    }

    /// Membership test for a pair of entities.
    #[must_use]
    pub fn federates(&self, sp_entity_id: &str, idp_entity_id: &str) -> bool {
        self.members.contains(sp_entity_id) && self.members.contains(idp_entity_id)
    }
}

/// One `classRef|level|label` authentication context mapping entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthnContextMapping {
    /// The authentication context class reference URI.
    pub class_ref: String,
    /// The authentication level this class maps to.
    pub level: i32,
    /// The entry's label; one entry is labelled `default`.
    pub label: String,
}

impl AuthnContextMapping {
    fn parse(entry: &str) -> SpResult<Self> {
        let mut parts = entry.split('|');
        let class_ref = parts.next().unwrap_or_default().trim();
        let level = parts.next().unwrap_or_default().trim();
        let label = parts.next().unwrap_or_default().trim();
        if class_ref.is_empty() || level.is_empty() {
            return Err(SpError::Configuration(format!(
                "bad authn context mapping entry '{entry}'"
            )));
        }
        Ok(Self {
            class_ref: class_ref.to_string(),
            level: level.parse().map_err(|_| {
                SpError::Configuration(format!("bad authn level in mapping entry '{entry}'"))
            })?,
            label: label.to_string(),
        })
    }
}

/// Extended SP configuration beyond standard metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedConfig {
    /// Alias of the signing key in the key store.
    pub signing_cert_alias: Option<String>,
    /// Alias of the encryption key in the key store.
    pub encryption_cert_alias: Option<String>,
    /// XML-DSig signature method URI.
    pub signature_method: String,
    /// XML-DSig digest method URI.
    pub digest_method: String,
    /// Path element disambiguating multi-SP deployments.
    pub meta_alias: Option<String>,
    /// Allowed clock skew, in seconds, for assertion time windows.
    pub assertion_time_skew: i64,
    /// Exact-match whitelist of acceptable RelayState values. Empty means
    /// the check is disabled.
    pub relay_state_url_list: Vec<String>,
    /// Authentication context class mappings.
    pub authn_context_mappings: Vec<AuthnContextMapping>,
    /// Require a signature on the ArtifactResponse.
    pub want_artifact_response_signed: bool,
    /// Require a signature on responses delivered over HTTP-POST.
    pub want_post_response_signed: bool,
    /// Require signatures on incoming logout requests.
    pub want_logout_request_signed: bool,
    /// Require signatures on incoming logout responses.
    pub want_logout_response_signed: bool,
}

impl Default for ExtendedConfig {
    fn default() -> Self {
        Self {
            signing_cert_alias: None,
            encryption_cert_alias: None,
            signature_method: crate::types::signature_algorithms::RSA_SHA256.to_string(),
            digest_method: crate::types::digest_algorithms::SHA1.to_string(),
            meta_alias: None,
            assertion_time_skew: 15,
            relay_state_url_list: Vec::new(),
            authn_context_mappings: Vec::new(),
            want_artifact_response_signed: false,
            want_post_response_signed: false,
            want_logout_request_signed: false,
            want_logout_response_signed: false,
        }
    }
}

impl ExtendedConfig {
    /// Parses an extended configuration document of the form
    /// `<SPExtendedConfig metaAlias="..."><Attribute name="..."><Value>..</Value></Attribute>...</SPExtendedConfig>`.
    pub fn from_xml(doc: &str) -> SpResult<Self> {
        let attributes = parse_attribute_map(doc)?;
        let mut config = Self {
            meta_alias: xml::element_attr(doc, "SPExtendedConfig", "metaAlias"),
            ..Self::default()
        };

        let first = |name: &str| -> Option<String> {
            attributes.get(name).and_then(|v| v.first()).cloned()
        };

        config.signing_cert_alias = first("signingCertAlias");
        config.encryption_cert_alias = first("encryptionCertAlias");
        if let Some(method) = first("signatureMethod") {
            config.signature_method = method;
        }
        if let Some(method) = first("digestMethod") {
            config.digest_method = method;
        }
        if let Some(skew) = first("assertionTimeSkew") {
            config.assertion_time_skew = skew.parse().map_err(|_| {
                SpError::Configuration(format!("bad assertionTimeSkew '{skew}'"))
            })?;
        }
        if let Some(values) = attributes.get("relayStateUrlList") {
            config.relay_state_url_list = values.clone();
        }
        if let Some(entries) = attributes.get("spAuthncontextClassrefMapping") {
            config.authn_context_mappings = entries
                .iter()
                .map(|e| AuthnContextMapping::parse(e))
                .collect::<SpResult<Vec<_>>>()?;
        }
        config.want_artifact_response_signed =
            first("wantArtifactResponseSigned").is_some_and(|v| v == "true");
        config.want_post_response_signed =
            first("wantPOSTResponseSigned").is_some_and(|v| v == "true");
        config.want_logout_request_signed =
            first("wantLogoutRequestSigned").is_some_and(|v| v == "true");
        config.want_logout_response_signed =
            first("wantLogoutResponseSigned").is_some_and(|v| v == "true");

        Ok(config)
    }

    /// Selects the authentication context class for a requested level:
    /// the entry whose level matches, else the `default`-labelled entry,
    /// else `PasswordProtectedTransport`.
    #[must_use]
    pub fn authn_context_for_level(&self, level: Option<i32>) -> &str {
        if let Some(level) = level {
            if let Some(mapping) = self
                .authn_context_mappings
                .iter()
                .find(|m| m.level == level)
            {
                return &mapping.class_ref;
            }
        }
        self.authn_context_mappings
            .iter()
            .find(|m| m.label == "default")
            .map_or(PASSWORD_PROTECTED_TRANSPORT, |m| m.class_ref.as_str())
    }

    /// Exact-string RelayState whitelist check. An empty list disables the
    /// check, matching deployments that never configured one.
    #[must_use]
    pub fn relay_state_allowed(&self, relay_state: &str) -> bool {
        self.relay_state_url_list.is_empty()
            || self
                .relay_state_url_list
                .iter()
                .any(|allowed| allowed == relay_state)
    }
}

/// A private key with its certificate, addressed by alias.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    /// The private key in DER form (PKCS#1 or PKCS#8).
    pub private_key_der: Vec<u8>,
    /// The matching X.509 certificate in DER form.
    pub certificate_der: Vec<u8>,
}

/// Signing/encryption credentials by alias.
#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: HashMap<String, KeyEntry>,
}

impl KeyStore {
    /// Creates an empty key store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a PEM key pair under an alias.
    pub fn add_pem(
        &mut self,
        alias: impl Into<String>,
        private_key_pem: &str,
        certificate_pem: &str,
    ) -> SpResult<()> {
        let private_key_der = sp_crypto::pem_to_der(private_key_pem, "PRIVATE KEY")
            .or_else(|| sp_crypto::pem_to_der(private_key_pem, "RSA PRIVATE KEY"))
            .ok_or_else(|| SpError::Configuration("invalid private key PEM".to_string()))?;
        let certificate_der = sp_crypto::pem_to_der(certificate_pem, "CERTIFICATE")
            .ok_or_else(|| SpError::Configuration("invalid certificate PEM".to_string()))?;
        self.keys.insert(
            alias.into(),
            KeyEntry {
                private_key_der,
                certificate_der,
            },
        );
        Ok(())
    }

    /// Looks up a key entry by alias.
    #[must_use]
    pub fn get(&self, alias: &str) -> Option<&KeyEntry> {
        self.keys.get(alias)
    }
}

/// The immutable metadata view shared by every component.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    sp: SpDescriptor,
    idps: HashMap<String, IdpDescriptor>,
    circles: Vec<CircleOfTrust>,
    config: ExtendedConfig,
    keys: KeyStore,
}

impl MetadataStore {
    /// Builds a store from configuration documents.
    pub fn from_documents(
        sp_metadata: &str,
        extended_config: &str,
        idp_metadata: &[&str],
        circle_documents: &[&str],
        keys: KeyStore,
    ) -> SpResult<Self> {
        let sp = SpDescriptor::from_xml(sp_metadata)?;
        let config = ExtendedConfig::from_xml(extended_config)?;

        let mut idps = HashMap::new();
        for doc in idp_metadata {
            let idp = IdpDescriptor::from_xml(doc)?;
            idps.insert(idp.entity_id.clone(), idp);
        }

        let circles = circle_documents
            .iter()
            .map(|doc| CircleOfTrust::from_xml(doc))
            .collect::<SpResult<Vec<_>>>()?;

        Ok(Self {
            sp,
            idps,
            circles,
            config,
            keys,
        })
    }

    /// The SP's own descriptor.
    #[must_use]
    pub fn sp(&self) -> &SpDescriptor {
        &self.sp
    }

    /// All known IdPs by entity ID.
    #[must_use]
    pub fn idps(&self) -> &HashMap<String, IdpDescriptor> {
        &self.idps
    }

    /// Looks up an IdP by entity ID.
    #[must_use]
    pub fn idp(&self, entity_id: &str) -> Option<&IdpDescriptor> {
        self.idps.get(entity_id)
    }

    /// The extended configuration.
    #[must_use]
    pub fn config(&self) -> &ExtendedConfig {
        &self.config
    }

    /// The configured circles of trust.
    #[must_use]
    pub fn circles(&self) -> &[CircleOfTrust] {
        &self.circles
    }

    /// True when some circle of trust contains both the SP and the issuer.
    #[must_use]
    pub fn shares_circle_of_trust(&self, issuer_entity_id: &str) -> bool {
        self.circles
            .iter()
            .any(|cot| cot.federates(&self.sp.entity_id, issuer_entity_id))
    }

    /// Resolves the SP signing credentials via the configured alias.
    pub fn signing_key(&self) -> SpResult<&KeyEntry> {
        let alias = self
            .config
            .signing_cert_alias
            .as_deref()
            .ok_or_else(|| SpError::Configuration("no signing certificate alias".to_string()))?;
        self.keys
            .get(alias)
            .ok_or_else(|| SpError::Configuration(format!("no key under alias '{alias}'")))
    }

    /// Generates the exportable SP metadata document. When `document_id` is
    /// given it becomes the `ID` attribute referenced by a subsequent
    /// enveloped signature; unsigned exports omit it.
    #[must_use]
    pub fn sp_metadata_document(&self, document_id: Option<&str>) -> String {
        let sp = &self.sp;
        let id_attr = document_id
            .map(|id| format!(" ID=\"{id}\""))
            .unwrap_or_default();

        let mut key_descriptors = String::new();
        if let Some(cert) = &sp.signing_certificate {
            key_descriptors.push_str(&key_descriptor_xml("signing", &cert.b64));
        }
        if let Some(cert) = &sp.encryption_certificate {
            key_descriptors.push_str(&key_descriptor_xml("encryption", &cert.b64));
        }

        let mut services = String::new();
        for slo in &sp.single_logout {
            let response_location = slo
                .response_location
                .as_deref()
                .map(|loc| format!(" ResponseLocation=\"{}\"", xml::xml_escape(loc)))
                .unwrap_or_default();
            services.push_str(&format!(
                "\n        <md:SingleLogoutService Binding=\"{}\" Location=\"{}\"{}/>",
                slo.binding.uri(),
                xml::xml_escape(&slo.location),
                response_location
            ));
        }
        for acs in &sp.assertion_consumers {
            services.push_str(&format!(
                "\n        <md:AssertionConsumerService Binding=\"{}\" Location=\"{}\" index=\"{}\"{}/>",
                acs.binding.uri(),
                xml::xml_escape(&acs.location),
                acs.index,
                if acs.is_default { " isDefault=\"true\"" } else { "" }
            ));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="{MD_NS}"{id_attr} entityID="{entity_id}">
    <md:SPSSODescriptor AuthnRequestsSigned="{requests_signed}" WantAssertionsSigned="{assertions_signed}" protocolSupportEnumeration="{SAMLP_NS}">{key_descriptors}{services}
    </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
            entity_id = xml::xml_escape(&sp.entity_id),
            requests_signed = sp.authn_requests_signed,
            assertions_signed = sp.want_assertions_signed,
        )
    }
}

fn key_descriptor_xml(use_attr: &str, cert_b64: &str) -> String {
    format!(
        r#"
        <md:KeyDescriptor use="{use_attr}">
            <ds:KeyInfo xmlns:ds="{XMLDSIG_NS}">
                <ds:X509Data>
                    <ds:X509Certificate>{cert_b64}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>"#
    )
}

fn bool_attr(doc: &str, element: &str, attr: &str) -> bool {
    xml::element_attr(doc, element, attr).is_some_and(|v| v == "true" || v == "1")
}

/// Endpoint and certificate data shared by both role descriptors.
struct ParsedRole {
    endpoints: Vec<(String, Endpoint, Option<(u16, bool)>)>,
    signing_certificate: Option<CertificateData>,
    encryption_certificate: Option<CertificateData>,
}

impl ParsedRole {
    fn plain(&self, role: &str) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .filter(|(r, _, _)| r == role)
            .map(|(_, e, _)| e.clone())
            .collect()
    }

    fn indexed(&self, role: &str) -> Vec<IndexedEndpoint> {
        self.endpoints
            .iter()
            .filter(|(r, _, _)| r == role)
            .map(|(_, e, idx)| {
                let (index, is_default) = idx.unwrap_or((0, false));
                IndexedEndpoint {
                    binding: e.binding,
                    location: e.location.clone(),
                    index,
                    is_default,
                }
            })
            .collect()
    }
}

/// Walks a role descriptor collecting service endpoints and key
/// descriptors.
fn parse_role_descriptor(descriptor: &str) -> SpResult<ParsedRole> {
    const SERVICE_ELEMENTS: [&str; 4] = [
        "AssertionConsumerService",
        "SingleLogoutService",
        "SingleSignOnService",
        "ArtifactResolutionService",
    ];

    let mut reader = Reader::from_reader(descriptor.as_bytes());
    reader.config_mut().trim_text(true);

    let mut role = ParsedRole {
        endpoints: Vec::new(),
        signing_certificate: None,
        encryption_certificate: None,
    };
    let mut key_use: Option<String> = None;
    let mut in_certificate = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e) | Event::Empty(ref e)) => {
                let local = e.name();
                let local = local.local_name();
                let local = String::from_utf8_lossy(local.as_ref()).into_owned();
                if SERVICE_ELEMENTS.contains(&local.as_str()) {
                    let mut binding = None;
                    let mut location = None;
                    let mut response_location = None;
                    let mut index = None;
                    let mut is_default = false;
                    for attr in e.attributes().filter_map(Result::ok) {
                        let value = String::from_utf8_lossy(&attr.value).into_owned();
                        match attr.key.as_ref() {
                            b"Binding" => binding = SamlBinding::from_uri(&value),
                            b"Location" => location = Some(value),
                            b"ResponseLocation" => response_location = Some(value),
                            b"index" => index = value.parse::<u16>().ok(),
                            b"isDefault" => is_default = value == "true",
                            _ => {}
                        }
                    }
                    let binding = binding.ok_or_else(|| {
                        SpError::Configuration(format!("{local} has a missing or unknown Binding"))
                    })?;
                    let location = location.ok_or_else(|| {
                        SpError::Configuration(format!("{local} has no Location"))
                    })?;
                    role.endpoints.push((
                        local,
                        Endpoint {
                            binding,
                            location,
                            response_location,
                        },
                        index.map(|i| (i, is_default)),
                    ));
                } else if local == "KeyDescriptor" {
                    key_use = e
                        .attributes()
                        .filter_map(Result::ok)
                        .find(|a| a.key.as_ref() == b"use")
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                } else if local == "X509Certificate" {
                    in_certificate = true;
                }
            }
            Ok(Event::Text(e)) if in_certificate => {
                let cert = CertificateData::from_b64(&String::from_utf8_lossy(e.as_ref()))?;
                // An unqualified KeyDescriptor serves both uses.
                match key_use.as_deref() {
                    Some("encryption") => role.encryption_certificate = Some(cert),
                    Some("signing") => role.signing_certificate = Some(cert),
                    _ => {
                        if role.signing_certificate.is_none() {
                            role.signing_certificate = Some(cert.clone());
                        }
                        if role.encryption_certificate.is_none() {
                            role.encryption_certificate = Some(cert);
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let local = e.name();
                let local = local.local_name();
                match local.as_ref() {
                    b"KeyDescriptor" => key_use = None,
                    b"X509Certificate" => in_certificate = false,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }

    Ok(role)
}

/// Parses `<Attribute name="..."><Value>..</Value>...</Attribute>` lists.
fn parse_attribute_map(doc: &str) -> SpResult<HashMap<String, Vec<String>>> {
    let mut reader = Reader::from_reader(doc.as_bytes());
    reader.config_mut().trim_text(true);

    let mut attributes: HashMap<String, Vec<String>> = HashMap::new();
    let mut current: Option<String> = None;
    let mut in_value = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let local = e.name();
                let local = local.local_name();
                match local.as_ref() {
                    b"Attribute" => {
                        current = e
                            .attributes()
                            .filter_map(Result::ok)
                            .find(|a| a.key.as_ref() == b"name")
                            .map(|a| String::from_utf8_lossy(&a.value).into_owned());
                    }
                    b"Value" => in_value = current.is_some(),
                    _ => {}
                }
            }
            Ok(Event::Text(e)) if in_value => {
                if let Some(name) = &current {
                    attributes
                        .entry(name.clone())
                        .or_default()
                        .push(String::from_utf8_lossy(e.as_ref()).into_owned());
                }
            }
            Ok(Event::End(ref e)) => {
                let local = e.name();
                let local = local.local_name();
                match local.as_ref() {
                    b"Attribute" => current = None,
                    b"Value" => in_value = false,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }

    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SP_METADATA: &str = r#"<?xml version="1.0"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://sp.example.org">
  <md:SPSSODescriptor AuthnRequestsSigned="false" WantAssertionsSigned="true" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data><ds:X509Certificate>TUlJQw==</ds:X509Certificate></ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleLogoutService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://sp.example.org/slo" ResponseLocation="https://sp.example.org/slo/done"/>
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://sp.example.org/acs" index="0" isDefault="true"/>
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Artifact" Location="https://sp.example.org/acs/artifact" index="1"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#;

    const IDP_METADATA: &str = r#"<?xml version="1.0"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://idp.example.org">
  <md:IDPSSODescriptor WantAuthnRequestsSigned="false" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data><ds:X509Certificate>TUlJQw==</ds:X509Certificate></ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:ArtifactResolutionService Binding="urn:oasis:names:tc:SAML:2.0:bindings:SOAP" Location="https://idp.example.org/artifact" index="0"/>
    <md:SingleLogoutService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.org/slo"/>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.org/sso"/>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp.example.org/sso"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#;

    const EXTENDED_CONFIG: &str = r#"<SPExtendedConfig metaAlias="/sp">
  <Attribute name="signingCertAlias"><Value>spkey</Value></Attribute>
  <Attribute name="assertionTimeSkew"><Value>15</Value></Attribute>
  <Attribute name="relayStateUrlList"><Value>https://sp.example.org/home</Value></Attribute>
  <Attribute name="spAuthncontextClassrefMapping">
    <Value>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport|0|default</Value>
    <Value>urn:oasis:names:tc:SAML:2.0:ac:classes:TimeSyncToken|1|</Value>
  </Attribute>
  <Attribute name="wantPOSTResponseSigned"><Value>true</Value></Attribute>
</SPExtendedConfig>"#;

    const COT: &str = r#"<CircleOfTrust name="cot1">
  <TrustedEntity>https://sp.example.org</TrustedEntity>
  <TrustedEntity>https://idp.example.org</TrustedEntity>
</CircleOfTrust>"#;

    fn store() -> MetadataStore {
        MetadataStore::from_documents(
            SP_METADATA,
            EXTENDED_CONFIG,
            &[IDP_METADATA],
            &[COT],
            KeyStore::new(),
        )
        .unwrap()
    }

    #[test]
    fn sp_descriptor_fields() {
        let store = store();
        let sp = store.sp();
        assert_eq!(sp.entity_id, "https://sp.example.org");
        assert!(!sp.authn_requests_signed);
        assert!(sp.want_assertions_signed);
        assert_eq!(sp.assertion_consumers.len(), 2);
        let acs = sp.assertion_consumer(SamlBinding::HttpPost).unwrap();
        assert_eq!(acs.location, "https://sp.example.org/acs");
        assert!(acs.is_default);
        assert_eq!(
            sp.single_logout[0].response_location.as_deref(),
            Some("https://sp.example.org/slo/done")
        );
        assert_eq!(sp.signing_certificate.as_ref().unwrap().b64, "TUlJQw==");
    }

    #[test]
    fn idp_descriptor_fields() {
        let store = store();
        let idp = store.idp("https://idp.example.org").unwrap();
        assert!(!idp.want_authn_requests_signed);
        assert_eq!(
            idp.sso_location(SamlBinding::HttpRedirect),
            Some("https://idp.example.org/sso")
        );
        assert_eq!(
            idp.artifact_resolution_location(),
            Some("https://idp.example.org/artifact")
        );
        assert!(idp.slo_service(SamlBinding::HttpRedirect).is_some());
        assert!(idp.slo_service(SamlBinding::HttpPost).is_none());
    }

    #[test]
    fn extended_config_fields() {
        let store = store();
        let config = store.config();
        assert_eq!(config.signing_cert_alias.as_deref(), Some("spkey"));
        assert_eq!(config.assertion_time_skew, 15);
        assert_eq!(config.meta_alias.as_deref(), Some("/sp"));
        assert!(config.want_post_response_signed);
        assert!(!config.want_logout_request_signed);
        assert_eq!(config.relay_state_url_list.len(), 1);
        assert_eq!(config.authn_context_mappings.len(), 2);
    }

    #[test]
    fn authn_context_selection() {
        let store = store();
        let config = store.config();
        assert!(config.authn_context_for_level(Some(1)).contains("TimeSyncToken"));
        assert!(config
            .authn_context_for_level(Some(7))
            .contains("PasswordProtectedTransport"));
        assert!(config
            .authn_context_for_level(None)
            .contains("PasswordProtectedTransport"));
    }

    #[test]
    fn relay_state_whitelist() {
        let store = store();
        assert!(store.config().relay_state_allowed("https://sp.example.org/home"));
        assert!(!store.config().relay_state_allowed("https://evil.example.org/"));

        let open = ExtendedConfig::default();
        assert!(open.relay_state_allowed("https://anywhere.example.org/"));
    }

    #[test]
    fn circle_of_trust_membership() {
        let store = store();
        assert!(store.shares_circle_of_trust("https://idp.example.org"));
        assert!(!store.shares_circle_of_trust("https://other.example.org"));
    }

    #[test]
    fn missing_entity_id_fails() {
        let err = SpDescriptor::from_xml("<md:EntityDescriptor/>").unwrap_err();
        assert!(matches!(err, SpError::Configuration(_)));
    }

    #[test]
    fn exported_metadata_document() {
        let store = store();
        let unsigned = store.sp_metadata_document(None);
        assert!(unsigned.contains("entityID=\"https://sp.example.org\""));
        assert!(unsigned.contains("AssertionConsumerService"));
        assert!(!unsigned.contains(" ID=\""));

        let with_id = store.sp_metadata_document(Some("m1"));
        assert!(with_id.contains(" ID=\"m1\""));
    }
}
