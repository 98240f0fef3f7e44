//! Inbound message parsing.
//!
//! Each parsed message wraps its raw XML and exposes typed getters.
//! Getters for fields the protocol requires fail with
//! [`SpError::MalformedMessage`] when the field is absent; genuinely
//! optional fields return `Option`. Signature getters only return the
//! enveloped signature whose parent is the top-level message element;
//! the assertion signature is exposed separately.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{SpError, SpResult};
use crate::types::NameId;
use crate::xml;

/// A SAML attribute from an AttributeStatement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// The attribute name.
    pub name: String,
    /// The human-readable name, when given.
    pub friendly_name: Option<String>,
    /// The attribute values in document order.
    pub values: Vec<String>,
}

fn parse_instant(value: &str) -> SpResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SpError::MalformedMessage(format!("bad timestamp '{value}': {e}")))
}

fn required(value: Option<String>, what: &str) -> SpResult<String> {
    value.ok_or_else(|| SpError::MalformedMessage(format!("{what} is missing")))
}

/// Checks that the document's first element has the expected local name.
fn check_root(xml_text: &str, local: &str) -> SpResult<()> {
    let start = xml::find_element(xml_text, local)
        .ok_or_else(|| SpError::MalformedMessage(format!("not a {local} document")))?;
    // Nothing but the XML declaration may precede the root element.
    let head = &xml_text[..start];
    if head.contains("</") {
        return Err(SpError::MalformedMessage(format!(
            "{local} is not the document root"
        )));
    }
    Ok(())
}

/// Extracts the first Signature element whose start offset falls inside
/// `[after, before)`. Used to pin signatures to their parent element.
fn signature_between(xml_text: &str, after: usize, before: Option<usize>) -> Option<String> {
    let pos = xml::find_element_from(xml_text, "Signature", after)?;
    if before.is_some_and(|b| pos >= b) {
        return None;
    }
    xml::extract_element_at(xml_text, pos).map(ToString::to_string)
}

/// A parsed `samlp:Response` carrying an authentication assertion.
#[derive(Debug, Clone)]
pub struct AuthnResponse {
    xml: String,
}

impl AuthnResponse {
    /// Wraps a decoded Response document.
    pub fn parse(xml_text: String) -> SpResult<Self> {
        check_root(&xml_text, "Response")?;
        Ok(Self { xml: xml_text })
    }

    /// The raw XML document.
    #[must_use]
    pub fn raw_xml(&self) -> &str {
        &self.xml
    }

    /// The response ID.
    pub fn id(&self) -> SpResult<String> {
        required(
            xml::element_attr(&self.xml, "Response", "ID"),
            "Response ID",
        )
    }

    /// The issuer entity ID.
    pub fn issuer(&self) -> SpResult<String> {
        required(xml::element_text(&self.xml, "Issuer"), "Issuer")
    }

    /// The top-level status code URI.
    pub fn status_code(&self) -> SpResult<String> {
        required(
            xml::element_attr(&self.xml, "StatusCode", "Value"),
            "StatusCode",
        )
    }

    /// The request ID this response answers, absent for IdP-initiated SSO.
    #[must_use]
    pub fn in_response_to(&self) -> Option<String> {
        xml::element_attr(&self.xml, "Response", "InResponseTo")
    }

    fn assertion_span(&self) -> Option<(usize, &str)> {
        let start = xml::find_element(&self.xml, "Assertion")?;
        xml::extract_element_at(&self.xml, start).map(|e| (start, e))
    }

    /// The first assertion element, when present.
    #[must_use]
    pub fn assertion_xml(&self) -> Option<&str> {
        self.assertion_span().map(|(_, e)| e)
    }

    /// The first assertion's ID.
    pub fn assertion_id(&self) -> SpResult<String> {
        let assertion = self
            .assertion_xml()
            .ok_or_else(|| SpError::MalformedMessage("Assertion is missing".to_string()))?;
        required(
            xml::element_attr(assertion, "Assertion", "ID"),
            "Assertion ID",
        )
    }

    /// The subject NameID with its qualifiers.
    pub fn subject_name_id(&self) -> SpResult<NameId> {
        let assertion = self
            .assertion_xml()
            .ok_or_else(|| SpError::MalformedMessage("Assertion is missing".to_string()))?;
        let subject = xml::extract_element(assertion, "Subject")
            .ok_or_else(|| SpError::MalformedMessage("Subject is missing".to_string()))?;
        let value = required(xml::element_text(subject, "NameID"), "Subject NameID")?;

        let mut name_id = NameId::new(value);
        name_id.format = xml::element_attr(subject, "NameID", "Format");
        name_id.name_qualifier = xml::element_attr(subject, "NameID", "NameQualifier");
        name_id.sp_name_qualifier = xml::element_attr(subject, "NameID", "SPNameQualifier");
        Ok(name_id)
    }

    fn conditions(&self) -> SpResult<&str> {
        let assertion = self
            .assertion_xml()
            .ok_or_else(|| SpError::MalformedMessage("Assertion is missing".to_string()))?;
        xml::extract_element(assertion, "Conditions")
            .ok_or_else(|| SpError::MalformedMessage("Conditions are missing".to_string()))
    }

    /// The assertion's NotBefore condition.
    pub fn condition_not_before(&self) -> SpResult<DateTime<Utc>> {
        let conditions = self.conditions()?;
        let value = required(
            xml::element_attr(conditions, "Conditions", "NotBefore"),
            "Conditions NotBefore",
        )?;
        parse_instant(&value)
    }

    /// The assertion's NotOnOrAfter condition.
    pub fn condition_not_on_or_after(&self) -> SpResult<DateTime<Utc>> {
        let conditions = self.conditions()?;
        let value = required(
            xml::element_attr(conditions, "Conditions", "NotOnOrAfter"),
            "Conditions NotOnOrAfter",
        )?;
        parse_instant(&value)
    }

    /// All audiences named by the assertion's audience restrictions.
    pub fn condition_audiences(&self) -> SpResult<Vec<String>> {
        let conditions = self.conditions()?;
        let mut audiences = Vec::new();
        let mut from = 0;
        while let Some(pos) = xml::find_element_from(conditions, "Audience", from) {
            if let Some(text) = xml::element_text_from(conditions, "Audience", pos) {
                if !text.is_empty() {
                    audiences.push(text);
                }
            }
            from = pos + 1;
        }
        Ok(audiences)
    }

    /// The authentication statement's session index.
    #[must_use]
    pub fn session_index(&self) -> Option<String> {
        let assertion = self.assertion_xml()?;
        xml::element_attr(assertion, "AuthnStatement", "SessionIndex")
    }

    /// The authentication instant.
    #[must_use]
    pub fn authn_instant(&self) -> Option<DateTime<Utc>> {
        let assertion = self.assertion_xml()?;
        let value = xml::element_attr(assertion, "AuthnStatement", "AuthnInstant")?;
        parse_instant(&value).ok()
    }

    /// The authentication context class reference.
    #[must_use]
    pub fn authn_context_class_ref(&self) -> Option<String> {
        let assertion = self.assertion_xml()?;
        xml::element_text(assertion, "AuthnContextClassRef").filter(|s| !s.is_empty())
    }

    /// The attributes carried by the assertion's attribute statements.
    pub fn attribute_statements(&self) -> SpResult<Vec<Attribute>> {
        let Some(assertion) = self.assertion_xml() else {
            return Ok(Vec::new());
        };
        parse_attributes(assertion)
    }

    /// The enveloped signature on the Response element itself.
    #[must_use]
    pub fn response_signature(&self) -> Option<String> {
        let response_start = xml::find_element(&self.xml, "Response")?;
        let assertion_start = xml::find_element(&self.xml, "Assertion");
        signature_between(&self.xml, response_start, assertion_start)
    }

    /// The enveloped signature on the first Assertion element.
    #[must_use]
    pub fn assertion_signature(&self) -> Option<String> {
        let (start, element) = self.assertion_span()?;
        signature_between(&self.xml, start, Some(start + element.len()))
    }
}

/// A parsed `samlp:ArtifactResponse` wrapping an AuthnResponse.
#[derive(Debug, Clone)]
pub struct ArtifactResponse {
    xml: String,
}

impl ArtifactResponse {
    /// Wraps a decoded ArtifactResponse document.
    pub fn parse(xml_text: String) -> SpResult<Self> {
        check_root(&xml_text, "ArtifactResponse")?;
        Ok(Self { xml: xml_text })
    }

    /// The raw XML document.
    #[must_use]
    pub fn raw_xml(&self) -> &str {
        &self.xml
    }

    /// The ArtifactResponse ID.
    pub fn id(&self) -> SpResult<String> {
        required(
            xml::element_attr(&self.xml, "ArtifactResponse", "ID"),
            "ArtifactResponse ID",
        )
    }

    /// The ArtifactResolve ID this response answers.
    pub fn in_response_to(&self) -> SpResult<String> {
        required(
            xml::element_attr(&self.xml, "ArtifactResponse", "InResponseTo"),
            "ArtifactResponse InResponseTo",
        )
    }

    /// The outer status code URI.
    pub fn status_code(&self) -> SpResult<String> {
        required(
            xml::element_attr(&self.xml, "StatusCode", "Value"),
            "ArtifactResponse StatusCode",
        )
    }

    /// The embedded AuthnResponse.
    pub fn response(&self) -> SpResult<AuthnResponse> {
        let response = xml::extract_element(&self.xml, "Response").ok_or_else(|| {
            SpError::MalformedMessage("ArtifactResponse carries no Response".to_string())
        })?;
        AuthnResponse::parse(response.to_string())
    }

    /// The enveloped signature on the ArtifactResponse element itself.
    #[must_use]
    pub fn signature(&self) -> Option<String> {
        let outer_start = xml::find_element(&self.xml, "ArtifactResponse")?;
        let response_start = xml::find_element(&self.xml, "Response");
        signature_between(&self.xml, outer_start, response_start)
    }
}

/// A parsed `samlp:LogoutRequest` (IdP-initiated logout).
#[derive(Debug, Clone)]
pub struct LogoutRequest {
    xml: String,
}

impl LogoutRequest {
    /// Wraps a decoded LogoutRequest document.
    pub fn parse(xml_text: String) -> SpResult<Self> {
        check_root(&xml_text, "LogoutRequest")?;
        Ok(Self { xml: xml_text })
    }

    /// The raw XML document.
    #[must_use]
    pub fn raw_xml(&self) -> &str {
        &self.xml
    }

    /// The request ID.
    pub fn id(&self) -> SpResult<String> {
        required(
            xml::element_attr(&self.xml, "LogoutRequest", "ID"),
            "LogoutRequest ID",
        )
    }

    /// The issuer entity ID.
    pub fn issuer(&self) -> SpResult<String> {
        required(xml::element_text(&self.xml, "Issuer"), "Issuer")
    }

    /// The subject to log out.
    #[must_use]
    pub fn name_id(&self) -> Option<NameId> {
        let value = xml::element_text(&self.xml, "NameID").filter(|s| !s.is_empty())?;
        let mut name_id = NameId::new(value);
        name_id.format = xml::element_attr(&self.xml, "NameID", "Format");
        name_id.name_qualifier = xml::element_attr(&self.xml, "NameID", "NameQualifier");
        name_id.sp_name_qualifier = xml::element_attr(&self.xml, "NameID", "SPNameQualifier");
        Some(name_id)
    }

    /// The session index to terminate.
    #[must_use]
    pub fn session_index(&self) -> Option<String> {
        xml::element_text(&self.xml, "SessionIndex").filter(|s| !s.is_empty())
    }

    /// The request expiry, when given.
    #[must_use]
    pub fn not_on_or_after(&self) -> Option<DateTime<Utc>> {
        let value = xml::element_attr(&self.xml, "LogoutRequest", "NotOnOrAfter")?;
        parse_instant(&value).ok()
    }

    /// The enveloped signature on the LogoutRequest element.
    #[must_use]
    pub fn signature(&self) -> Option<String> {
        let start = xml::find_element(&self.xml, "LogoutRequest")?;
        signature_between(&self.xml, start, None)
    }
}

/// A parsed `samlp:LogoutResponse`.
#[derive(Debug, Clone)]
pub struct LogoutResponse {
    xml: String,
}

impl LogoutResponse {
    /// Wraps a decoded LogoutResponse document.
    pub fn parse(xml_text: String) -> SpResult<Self> {
        check_root(&xml_text, "LogoutResponse")?;
        Ok(Self { xml: xml_text })
    }

    /// The raw XML document.
    #[must_use]
    pub fn raw_xml(&self) -> &str {
        &self.xml
    }

    /// The response ID.
    pub fn id(&self) -> SpResult<String> {
        required(
            xml::element_attr(&self.xml, "LogoutResponse", "ID"),
            "LogoutResponse ID",
        )
    }

    /// The issuer entity ID.
    pub fn issuer(&self) -> SpResult<String> {
        required(xml::element_text(&self.xml, "Issuer"), "Issuer")
    }

    /// The status code URI.
    pub fn status_code(&self) -> SpResult<String> {
        required(
            xml::element_attr(&self.xml, "StatusCode", "Value"),
            "LogoutResponse StatusCode",
        )
    }

    /// The LogoutRequest ID this response answers.
    #[must_use]
    pub fn in_response_to(&self) -> Option<String> {
        xml::element_attr(&self.xml, "LogoutResponse", "InResponseTo")
    }

    /// The enveloped signature on the LogoutResponse element.
    #[must_use]
    pub fn signature(&self) -> Option<String> {
        let start = xml::find_element(&self.xml, "LogoutResponse")?;
        signature_between(&self.xml, start, None)
    }
}

/// Collects attributes from every AttributeStatement in an assertion.
fn parse_attributes(assertion: &str) -> SpResult<Vec<Attribute>> {
    let mut reader = Reader::from_reader(assertion.as_bytes());
    reader.config_mut().trim_text(true);

    let mut attributes = Vec::new();
    let mut in_statement = false;
    let mut current: Option<Attribute> = None;
    let mut in_value = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name();
                let local = name.local_name();
                match local.as_ref() {
                    b"AttributeStatement" => in_statement = true,
                    b"Attribute" if in_statement => {
                        let mut attribute = Attribute {
                            name: String::new(),
                            friendly_name: None,
                            values: Vec::new(),
                        };
                        for attr in e.attributes().filter_map(Result::ok) {
                            let value = String::from_utf8_lossy(&attr.value).into_owned();
                            match attr.key.as_ref() {
                                b"Name" => attribute.name = value,
                                b"FriendlyName" => attribute.friendly_name = Some(value),
                                _ => {}
                            }
                        }
                        current = Some(attribute);
                    }
                    b"AttributeValue" if current.is_some() => in_value = true,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) if in_value => {
                if let Some(attribute) = current.as_mut() {
                    attribute
                        .values
                        .push(String::from_utf8_lossy(e.as_ref()).into_owned());
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                let local = name.local_name();
                match local.as_ref() {
                    b"AttributeStatement" => in_statement = false,
                    b"Attribute" => {
                        if let Some(attribute) = current.take() {
                            if !attribute.name.is_empty() {
                                attributes.push(attribute);
                            }
                        }
                    }
                    b"AttributeValue" => in_value = false,
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

    const RESPONSE: &str = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="r1" InResponseTo="req1" Version="2.0" IssueInstant="2026-08-02T10:00:00Z">
  <saml:Issuer>https://idp.example.org</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
  <saml:Assertion ID="a1" Version="2.0" IssueInstant="2026-08-02T10:00:00Z">
    <saml:Issuer>https://idp.example.org</saml:Issuer>
    <saml:Subject>
      <saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress" NameQualifier="https://idp.example.org">user@example.org</saml:NameID>
    </saml:Subject>
    <saml:Conditions NotBefore="2026-08-02T09:59:30Z" NotOnOrAfter="2026-08-02T10:01:00Z">
      <saml:AudienceRestriction>
        <saml:Audience>https://sp.example.org</saml:Audience>
      </saml:AudienceRestriction>
    </saml:Conditions>
    <saml:AuthnStatement AuthnInstant="2026-08-02T10:00:00Z" SessionIndex="s1">
      <saml:AuthnContext>
        <saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml:AuthnContextClassRef>
      </saml:AuthnContext>
    </saml:AuthnStatement>
    <saml:AttributeStatement>
      <saml:Attribute Name="mail" FriendlyName="Email">
        <saml:AttributeValue>user@example.org</saml:AttributeValue>
      </saml:Attribute>
      <saml:Attribute Name="groups">
        <saml:AttributeValue>staff</saml:AttributeValue>
        <saml:AttributeValue>admins</saml:AttributeValue>
      </saml:Attribute>
    </saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#;

    #[test]
    fn authn_response_required_getters() {
        let response = AuthnResponse::parse(RESPONSE.to_string()).unwrap();
        assert_eq!(response.id().unwrap(), "r1");
        assert_eq!(response.issuer().unwrap(), "https://idp.example.org");
        assert_eq!(
            response.status_code().unwrap(),
            "urn:oasis:names:tc:SAML:2.0:status:Success"
        );
        assert_eq!(response.assertion_id().unwrap(), "a1");

        let name_id = response.subject_name_id().unwrap();
        assert_eq!(name_id.value, "user@example.org");
        assert!(name_id.format.unwrap().contains("emailAddress"));

        assert_eq!(
            response.condition_audiences().unwrap(),
            vec!["https://sp.example.org".to_string()]
        );
        assert!(response.condition_not_before().unwrap() < response.condition_not_on_or_after().unwrap());
    }

    #[test]
    fn authn_response_optional_getters() {
        let response = AuthnResponse::parse(RESPONSE.to_string()).unwrap();
        assert_eq!(response.in_response_to().as_deref(), Some("req1"));
        assert_eq!(response.session_index().as_deref(), Some("s1"));
        assert!(response
            .authn_context_class_ref()
            .unwrap()
            .contains("PasswordProtectedTransport"));
        assert!(response.authn_instant().is_some());
        assert!(response.response_signature().is_none());
        assert!(response.assertion_signature().is_none());

        let attributes = response.attribute_statements().unwrap();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0].name, "mail");
        assert_eq!(attributes[0].friendly_name.as_deref(), Some("Email"));
        assert_eq!(attributes[1].values, vec!["staff", "admins"]);
    }

    #[test]
    fn signature_parent_discrimination() {
        // Signature inside the assertion only: response_signature is None.
        let xml_text = RESPONSE.replace(
            "<saml:Issuer>https://idp.example.org</saml:Issuer>\n    <saml:Subject>",
            "<saml:Issuer>https://idp.example.org</saml:Issuer>\n    <ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\"><ds:SignedInfo/></ds:Signature>\n    <saml:Subject>",
        );
        let response = AuthnResponse::parse(xml_text).unwrap();
        assert!(response.response_signature().is_none());
        assert!(response.assertion_signature().is_some());
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let xml_text = RESPONSE.replace(" InResponseTo=\"req1\"", "");
        let response = AuthnResponse::parse(xml_text).unwrap();
        assert!(response.in_response_to().is_none());

        let no_conditions =
            AuthnResponse::parse(RESPONSE.replace("NotOnOrAfter", "Other")).unwrap();
        assert!(matches!(
            no_conditions.condition_not_on_or_after().unwrap_err(),
            SpError::MalformedMessage(_)
        ));
    }

    #[test]
    fn rejects_wrong_root() {
        assert!(AuthnResponse::parse("<samlp:LogoutRequest/>".to_string()).is_err());
        assert!(LogoutRequest::parse("<samlp:Response/>".to_string()).is_err());
    }

    #[test]
    fn artifact_response_embeds_response() {
        let artifact = format!(
            r#"<samlp:ArtifactResponse xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="ar1" InResponseTo="resolve1" Version="2.0" IssueInstant="2026-08-02T10:00:00Z">
  <saml:Issuer xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">https://idp.example.org</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
  {RESPONSE}
</samlp:ArtifactResponse>"#
        );
        let parsed = ArtifactResponse::parse(artifact).unwrap();
        assert_eq!(parsed.id().unwrap(), "ar1");
        assert_eq!(parsed.in_response_to().unwrap(), "resolve1");
        assert!(parsed.signature().is_none());
        let inner = parsed.response().unwrap();
        assert_eq!(inner.id().unwrap(), "r1");
    }

    #[test]
    fn logout_request_getters() {
        let xml_text = r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="lr1" Version="2.0" IssueInstant="2026-08-02T10:00:00Z" NotOnOrAfter="2026-08-02T10:05:00Z">
  <saml:Issuer>https://idp.example.org</saml:Issuer>
  <saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">user@example.org</saml:NameID>
  <samlp:SessionIndex>s1</samlp:SessionIndex>
</samlp:LogoutRequest>"#;
        let request = LogoutRequest::parse(xml_text.to_string()).unwrap();
        assert_eq!(request.id().unwrap(), "lr1");
        assert_eq!(request.issuer().unwrap(), "https://idp.example.org");
        assert_eq!(request.session_index().as_deref(), Some("s1"));
        assert_eq!(request.name_id().unwrap().value, "user@example.org");
        assert!(request.not_on_or_after().is_some());
        assert!(request.signature().is_none());
    }

    #[test]
    fn logout_response_getters() {
        let xml_text = r#"<samlp:LogoutResponse xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="lres1" InResponseTo="lr1" Version="2.0" IssueInstant="2026-08-02T10:00:00Z">
  <saml:Issuer>https://idp.example.org</saml:Issuer>
  <samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
</samlp:LogoutResponse>"#;
        let response = LogoutResponse::parse(xml_text.to_string()).unwrap();
        assert_eq!(response.id().unwrap(), "lres1");
        assert_eq!(response.in_response_to().as_deref(), Some("lr1"));
        assert_eq!(
            response.status_code().unwrap(),
            "urn:oasis:names:tc:SAML:2.0:status:Success"
        );
    }
}
