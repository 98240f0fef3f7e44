//! Outbound message construction.
//!
//! Builds the XML for AuthnRequest, LogoutRequest, LogoutResponse, and
//! ArtifactResolve messages. Signing happens afterwards, over the built
//! document, in the signature module.

use chrono::Utc;

use crate::error::{SpError, SpResult};
use crate::metadata::{IdpDescriptor, MetadataStore};
use crate::types::{status_codes, NameId, SamlBinding, SAMLP_NS, SAML_NS};
use crate::xml::xml_escape;

/// A freshly built outbound message.
#[derive(Debug, Clone)]
pub struct BuiltMessage {
    /// The generated message ID.
    pub id: String,
    /// The message XML.
    pub xml: String,
}

/// Parameters for building an AuthnRequest.
#[derive(Debug, Clone, Default)]
pub struct AuthnRequestParams {
    /// Binding used to deliver the request to the IdP.
    pub request_binding: Option<SamlBinding>,
    /// Binding the IdP should use for its response.
    pub response_binding: Option<SamlBinding>,
    /// Force re-authentication at the IdP.
    pub force_authn: Option<bool>,
    /// The IdP must not interact with the user.
    pub is_passive: Option<bool>,
    /// Permit the IdP to create a new federation identifier.
    pub allow_create: Option<bool>,
    /// Requested NameID format URI.
    pub name_id_format: Option<String>,
    /// Requested authentication level.
    pub auth_level: Option<i32>,
    /// Application RelayState to round-trip through the IdP.
    pub relay_state: Option<String>,
}

/// Formats a UTC instant the way SAML expects.
#[must_use]
pub fn issue_instant() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Builds an AuthnRequest for the given IdP.
pub fn build_authn_request(
    store: &MetadataStore,
    idp: &IdpDescriptor,
    params: &AuthnRequestParams,
) -> SpResult<BuiltMessage> {
    let request_binding = params.request_binding.unwrap_or(SamlBinding::HttpRedirect);
    let response_binding = params.response_binding.unwrap_or(SamlBinding::HttpPost);

    let destination = idp.sso_location(request_binding).ok_or_else(|| {
        SpError::Configuration(format!(
            "IdP '{}' has no single sign-on endpoint for {}",
            idp.entity_id,
            request_binding.uri()
        ))
    })?;
    let acs = store.sp().assertion_consumer(response_binding).ok_or_else(|| {
        SpError::Configuration(format!(
            "SP has no assertion consumer for {}",
            response_binding.uri()
        ))
    })?;

    let id = sp_crypto::message_id();
    let instant = issue_instant();

    let mut flags = String::new();
    if let Some(force) = params.force_authn {
        flags.push_str(&format!(" ForceAuthn=\"{force}\""));
    }
    if let Some(passive) = params.is_passive {
        flags.push_str(&format!(" IsPassive=\"{passive}\""));
    }

    let name_id_policy = match (&params.name_id_format, params.allow_create) {
        (None, None) => String::new(),
        (format, allow_create) => {
            let format_attr = format
                .as_deref()
                .map(|f| format!(" Format=\"{}\"", xml_escape(f)))
                .unwrap_or_default();
            let allow_attr = allow_create
                .map(|a| format!(" AllowCreate=\"{a}\""))
                .unwrap_or_default();
            format!("\n    <samlp:NameIDPolicy{format_attr}{allow_attr}/>")
        }
    };

    let class_ref = store.config().authn_context_for_level(params.auth_level);
    let requested_context = format!(
        "\n    <samlp:RequestedAuthnContext Comparison=\"exact\">\
         <saml:AuthnContextClassRef>{}</saml:AuthnContextClassRef>\
         </samlp:RequestedAuthnContext>",
        xml_escape(class_ref)
    );

    let xml = format!(
        r#"<samlp:AuthnRequest xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}" AssertionConsumerServiceURL="{acs_url}" ProtocolBinding="{protocol_binding}"{flags}>
    <saml:Issuer>{issuer}</saml:Issuer>{name_id_policy}{requested_context}
</samlp:AuthnRequest>"#,
        destination = xml_escape(destination),
        acs_url = xml_escape(&acs.location),
        protocol_binding = acs.binding.uri(),
        issuer = xml_escape(&store.sp().entity_id),
    );

    Ok(BuiltMessage { id, xml })
}

/// Builds a LogoutRequest. Both the NameID and the session index are
/// required; a missing session index is a builder-time failure.
pub fn build_logout_request(
    store: &MetadataStore,
    idp: &IdpDescriptor,
    binding: SamlBinding,
    name_id: &NameId,
    session_index: &str,
) -> SpResult<BuiltMessage> {
    if name_id.value.is_empty() {
        return Err(SpError::Configuration(
            "logout request requires a NameID".to_string(),
        ));
    }
    if session_index.is_empty() {
        return Err(SpError::Configuration(
            "logout request requires a SessionIndex".to_string(),
        ));
    }

    let destination = idp
        .slo_service(binding)
        .map(|e| e.location.as_str())
        .ok_or_else(|| {
            SpError::Configuration(format!(
                "IdP '{}' has no single logout endpoint for {}",
                idp.entity_id,
                binding.uri()
            ))
        })?;

    let id = sp_crypto::message_id();
    let instant = issue_instant();

    let mut name_id_attrs = String::new();
    if let Some(format) = &name_id.format {
        name_id_attrs.push_str(&format!(" Format=\"{}\"", xml_escape(format)));
    }
    if let Some(qualifier) = &name_id.name_qualifier {
        name_id_attrs.push_str(&format!(" NameQualifier=\"{}\"", xml_escape(qualifier)));
    }
    if let Some(qualifier) = &name_id.sp_name_qualifier {
        name_id_attrs.push_str(&format!(" SPNameQualifier=\"{}\"", xml_escape(qualifier)));
    }

    let xml = format!(
        r#"<samlp:LogoutRequest xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}">
    <saml:Issuer>{issuer}</saml:Issuer>
    <saml:NameID{name_id_attrs}>{name_id_value}</saml:NameID>
    <samlp:SessionIndex>{session_index}</samlp:SessionIndex>
</samlp:LogoutRequest>"#,
        destination = xml_escape(destination),
        issuer = xml_escape(&store.sp().entity_id),
        name_id_value = xml_escape(&name_id.value),
        session_index = xml_escape(session_index),
    );

    Ok(BuiltMessage { id, xml })
}

/// Builds a success LogoutResponse answering `in_response_to`. The
/// destination is the IdP's logout response location, falling back to the
/// request location.
pub fn build_logout_response(
    store: &MetadataStore,
    idp: &IdpDescriptor,
    binding: SamlBinding,
    in_response_to: &str,
) -> SpResult<BuiltMessage> {
    let slo = idp.slo_service(binding).ok_or_else(|| {
        SpError::Configuration(format!(
            "IdP '{}' has no single logout endpoint for {}",
            idp.entity_id,
            binding.uri()
        ))
    })?;
    let destination = slo.response_location.as_deref().unwrap_or(&slo.location);

    let id = sp_crypto::message_id();
    let instant = issue_instant();

    let xml = format!(
        r#"<samlp:LogoutResponse xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="{id}" InResponseTo="{in_response_to}" Version="2.0" IssueInstant="{instant}" Destination="{destination}">
    <saml:Issuer>{issuer}</saml:Issuer>
    <samlp:Status>
        <samlp:StatusCode Value="{status}"/>
    </samlp:Status>
</samlp:LogoutResponse>"#,
        in_response_to = xml_escape(in_response_to),
        destination = xml_escape(destination),
        issuer = xml_escape(&store.sp().entity_id),
        status = status_codes::SUCCESS,
    );

    Ok(BuiltMessage { id, xml })
}

/// Builds an ArtifactResolve carrying the base64 artifact.
#[must_use]
pub fn build_artifact_resolve(
    sp_entity_id: &str,
    destination: &str,
    artifact_b64: &str,
) -> BuiltMessage {
    let id = sp_crypto::message_id();
    let instant = issue_instant();

    let xml = format!(
        r#"<samlp:ArtifactResolve xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}">
    <saml:Issuer>{issuer}</saml:Issuer>
    <samlp:Artifact>{artifact}</samlp:Artifact>
</samlp:ArtifactResolve>"#,
        destination = xml_escape(destination),
        issuer = xml_escape(sp_entity_id),
        artifact = xml_escape(artifact_b64),
    );

    BuiltMessage { id, xml }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::KeyStore;

    const SP_METADATA: &str = r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://sp.example.org">
  <md:SPSSODescriptor WantAssertionsSigned="false">
    <md:SingleLogoutService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://sp.example.org/slo"/>
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://sp.example.org/acs" index="0" isDefault="true"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#;

    const IDP_METADATA: &str = r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://idp.example.org">
  <md:IDPSSODescriptor>
    <md:SingleLogoutService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.org/slo" ResponseLocation="https://idp.example.org/slo/response"/>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="https://idp.example.org/sso"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#;

    fn store() -> MetadataStore {
        MetadataStore::from_documents(
            SP_METADATA,
            "<SPExtendedConfig/>",
            &[IDP_METADATA],
            &[],
            KeyStore::new(),
        )
        .unwrap()
    }

    #[test]
    fn authn_request_fields() {
        let store = store();
        let idp = store.idp("https://idp.example.org").unwrap();
        let built = build_authn_request(
            &store,
            idp,
            &AuthnRequestParams {
                force_authn: Some(true),
                allow_create: Some(true),
                auth_level: Some(0),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(built.xml.contains(&format!("ID=\"{}\"", built.id)));
        assert!(built.xml.contains("Version=\"2.0\""));
        assert!(built.xml.contains("Destination=\"https://idp.example.org/sso\""));
        assert!(built.xml.contains(
            "AssertionConsumerServiceURL=\"https://sp.example.org/acs\""
        ));
        assert!(built.xml.contains("ProtocolBinding=\"urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST\""));
        assert!(built.xml.contains("ForceAuthn=\"true\""));
        assert!(!built.xml.contains("IsPassive"));
        assert!(built.xml.contains("AllowCreate=\"true\""));
        assert!(built.xml.contains("<saml:Issuer>https://sp.example.org</saml:Issuer>"));
        assert!(built.xml.contains("PasswordProtectedTransport"));
    }

    #[test]
    fn authn_request_id_is_ncname() {
        let store = store();
        let idp = store.idp("https://idp.example.org").unwrap();
        let built = build_authn_request(&store, idp, &AuthnRequestParams::default()).unwrap();
        assert!(built.id.chars().next().unwrap().is_ascii_alphabetic());
    }

    #[test]
    fn logout_request_requires_session_index() {
        let store = store();
        let idp = store.idp("https://idp.example.org").unwrap();
        let err = build_logout_request(
            &store,
            idp,
            SamlBinding::HttpRedirect,
            &NameId::new("user@example.org"),
            "",
        )
        .unwrap_err();
        assert!(matches!(err, SpError::Configuration(_)));
    }

    #[test]
    fn logout_request_carries_name_id_and_session() {
        let store = store();
        let idp = store.idp("https://idp.example.org").unwrap();
        let name_id = NameId::new("user@example.org")
            .with_format(crate::types::NameIdFormat::Email)
            .with_name_qualifier("https://idp.example.org");
        let built =
            build_logout_request(&store, idp, SamlBinding::HttpRedirect, &name_id, "s1").unwrap();

        assert!(built.xml.contains(">user@example.org</saml:NameID>"));
        assert!(built.xml.contains("NameQualifier=\"https://idp.example.org\""));
        assert!(built.xml.contains("<samlp:SessionIndex>s1</samlp:SessionIndex>"));
        assert!(built.xml.contains("Destination=\"https://idp.example.org/slo\""));
    }

    #[test]
    fn logout_response_uses_response_location() {
        let store = store();
        let idp = store.idp("https://idp.example.org").unwrap();
        let built =
            build_logout_response(&store, idp, SamlBinding::HttpRedirect, "req42").unwrap();

        assert!(built.xml.contains("InResponseTo=\"req42\""));
        assert!(built.xml.contains("Destination=\"https://idp.example.org/slo/response\""));
        assert!(built.xml.contains("urn:oasis:names:tc:SAML:2.0:status:Success"));
    }

    #[test]
    fn artifact_resolve_structure() {
        let built = build_artifact_resolve(
            "https://sp.example.org",
            "https://idp.example.org/artifact",
            "AAQAAA==",
        );
        assert!(built.xml.contains("<samlp:Artifact>AAQAAA==</samlp:Artifact>"));
        assert!(built.xml.contains("<saml:Issuer>https://sp.example.org</saml:Issuer>"));
    }
}
