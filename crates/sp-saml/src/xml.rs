//! Lightweight XML scanning helpers.
//!
//! SAML messages are small and namespace prefixes vary by IdP vendor, so
//! these helpers match elements by *local* name regardless of prefix. They
//! operate on the raw document text; byte offsets into the original string
//! are preserved, which the signature code relies on when splicing and
//! digesting elements.

/// Returns the local part of a qualified name.
#[must_use]
pub fn local_name(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

/// Returns true when `c` terminates an element name inside a tag.
const fn is_name_end(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | b'>' | b'/')
}

/// Reads the qualified element name starting at `pos + 1` (`pos` is `<`).
fn tag_name_at(xml: &str, pos: usize) -> Option<&str> {
    let bytes = xml.as_bytes();
    let mut end = pos + 1;
    while end < bytes.len() && !is_name_end(bytes[end]) {
        end += 1;
    }
    if end == pos + 1 {
        return None;
    }
    Some(&xml[pos + 1..end])
}

/// Finds the byte offset of the first start tag whose local name is `local`,
/// scanning from `from`. Skips end tags, comments, and declarations.
#[must_use]
pub fn find_element_from(xml: &str, local: &str, from: usize) -> Option<usize> {
    let bytes = xml.as_bytes();
    let mut pos = from;
    while pos < bytes.len() {
        let rel = xml[pos..].find('<')?;
        let at = pos + rel;
        match bytes.get(at + 1) {
            Some(b'/' | b'!' | b'?') | None => {
                pos = at + 1;
                continue;
            }
            _ => {}
        }
        if let Some(name) = tag_name_at(xml, at) {
            if local_name(name) == local {
                return Some(at);
            }
        }
        pos = at + 1;
    }
    None
}

/// Finds the first start tag whose local name is `local`.
#[must_use]
pub fn find_element(xml: &str, local: &str) -> Option<usize> {
    find_element_from(xml, local, 0)
}

/// Extracts an attribute value from the first element with the given local
/// name. The attribute name must be preceded by whitespace, so `ID` does not
/// match inside `entityID`.
#[must_use]
pub fn element_attr(xml: &str, local: &str, attr: &str) -> Option<String> {
    let start = find_element(xml, local)?;
    element_attr_at(xml, start, attr)
}

/// Extracts an attribute value from the start tag at `start`.
#[must_use]
pub fn element_attr_at(xml: &str, start: usize, attr: &str) -> Option<String> {
    let tag_end = xml[start..].find('>')?;
    let tag = &xml[start..start + tag_end];
    let pat = format!("{attr}=\"");
    let mut search = 0;
    while let Some(rel) = tag[search..].find(&pat) {
        let abs = search + rel;
        let boundary = tag[..abs]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace);
        if boundary {
            let value_start = abs + pat.len();
            let value_end = tag[value_start..].find('"')?;
            return Some(tag[value_start..value_start + value_end].to_string());
        }
        search = abs + pat.len();
    }
    None
}

/// Extracts the trimmed text content of the first element with the given
/// local name. Intended for leaf elements (Issuer, NameID, Audience, ...).
#[must_use]
pub fn element_text(xml: &str, local: &str) -> Option<String> {
    element_text_from(xml, local, 0)
}

/// As [`element_text`], scanning from a byte offset.
#[must_use]
pub fn element_text_from(xml: &str, local: &str, from: usize) -> Option<String> {
    let start = find_element_from(xml, local, from)?;
    let open_end = start + xml[start..].find('>')?;
    if xml.as_bytes()[open_end - 1] == b'/' {
        // Self-closing element carries no text.
        return Some(String::new());
    }
    let content_start = open_end + 1;
    let close = xml[content_start..].find("</")?;
    Some(xml[content_start..content_start + close].trim().to_string())
}

/// Extracts the whole element starting at `start`, balancing nested
/// occurrences of the same tag name and handling self-closing tags.
#[must_use]
pub fn extract_element_at(xml: &str, start: usize) -> Option<&str> {
    let name = tag_name_at(xml, start)?.to_string();
    let open_end = start + xml[start..].find('>')?;
    if xml.as_bytes()[open_end - 1] == b'/' {
        return Some(&xml[start..=open_end]);
    }

    let open_pat = format!("<{name}");
    let close_pat = format!("</{name}>");
    let mut depth = 1usize;
    let mut pos = open_end + 1;
    while depth > 0 {
        let next_open = xml[pos..].find(&open_pat).map(|p| pos + p);
        let next_close = xml[pos..].find(&close_pat).map(|p| pos + p)?;
        match next_open {
            // A longer tag name sharing the prefix (SignatureValue vs
            // Signature) just advances the scan.
            Some(o) if o < next_close => {
                let inner_end = o + xml[o..].find('>')?;
                if tag_name_at(xml, o) == Some(name.as_str())
                    && xml.as_bytes()[inner_end - 1] != b'/'
                {
                    depth += 1;
                }
                pos = inner_end + 1;
            }
            _ => {
                depth -= 1;
                pos = next_close + close_pat.len();
            }
        }
    }
    Some(&xml[start..pos])
}

/// Extracts the first whole element with the given local name.
#[must_use]
pub fn extract_element<'a>(xml: &'a str, local: &str) -> Option<&'a str> {
    let start = find_element(xml, local)?;
    extract_element_at(xml, start)
}

/// As [`extract_element`], scanning from a byte offset.
#[must_use]
pub fn extract_element_from<'a>(xml: &'a str, local: &str, from: usize) -> Option<&'a str> {
    let start = find_element_from(xml, local, from)?;
    extract_element_at(xml, start)
}

/// Returns the byte span `(start, end)` of the element carrying
/// `ID="<id>"` (or `Id=`).
#[must_use]
pub fn element_span_by_id(xml: &str, id: &str) -> Option<(usize, usize)> {
    let id_pattern = format!("ID=\"{id}\"");
    let alt_pattern = format!("Id=\"{id}\"");
    let attr_pos = xml.find(&id_pattern).or_else(|| xml.find(&alt_pattern))?;

    let mut start = attr_pos;
    while start > 0 && xml.as_bytes()[start - 1] != b'<' {
        start -= 1;
    }
    start = start.checked_sub(1)?;
    let element = extract_element_at(xml, start)?;
    Some((start, start + element.len()))
}

/// Extracts the whole element carrying `ID="<id>"` (or `Id=`).
#[must_use]
pub fn element_by_id<'a>(xml: &'a str, id: &str) -> Option<&'a str> {
    let (start, end) = element_span_by_id(xml, id)?;
    Some(&xml[start..end])
}

/// Removes the first Signature element from the document, returning the
/// spliced string. Returns the input unchanged when no signature exists.
#[must_use]
pub fn remove_signature_element(xml: &str) -> String {
    let Some(start) = find_element(xml, "Signature") else {
        return xml.to_string();
    };
    let Some(element) = extract_element_at(xml, start) else {
        return xml.to_string();
    };
    let end = start + element.len();
    format!("{}{}", &xml[..start], &xml[end..])
}

/// Whitespace-normalizing canonicalization adapter.
///
/// Both the signing and verifying paths run the same adapter, so digests
/// stay consistent across the insert/remove splice of the enveloped
/// signature.
#[must_use]
pub fn canonicalize(xml: &str) -> String {
    xml.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Escapes XML special characters for use in attribute values and text.
#[must_use]
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_element_regardless_of_prefix() {
        let xml = r#"<samlp:Response><saml:Issuer>idp</saml:Issuer></samlp:Response>"#;
        assert!(find_element(xml, "Issuer").is_some());
        assert!(find_element(xml, "Response").is_some());
        assert!(find_element(xml, "Assertion").is_none());
    }

    #[test]
    fn attr_does_not_match_suffix() {
        let xml = r#"<md:EntityDescriptor entityID="https://sp.example.org"/>"#;
        assert_eq!(element_attr(xml, "EntityDescriptor", "ID"), None);
        assert_eq!(
            element_attr(xml, "EntityDescriptor", "entityID").as_deref(),
            Some("https://sp.example.org")
        );
    }

    #[test]
    fn element_text_trims() {
        let xml = "<saml:Issuer>\n  https://idp.example.org\n</saml:Issuer>";
        assert_eq!(
            element_text(xml, "Issuer").as_deref(),
            Some("https://idp.example.org")
        );
    }

    #[test]
    fn extract_balances_nested_tags() {
        let xml = r#"<samlp:StatusCode Value="outer"><samlp:StatusCode Value="inner"/></samlp:StatusCode><tail/>"#;
        let element = extract_element(xml, "StatusCode").unwrap();
        assert!(element.ends_with("</samlp:StatusCode>"));
        assert!(element.contains("inner"));
        assert!(!element.contains("tail"));
    }

    #[test]
    fn extract_self_closing() {
        let xml = r#"<a><samlp:NameIDPolicy Format="x"/></a>"#;
        assert_eq!(
            extract_element(xml, "NameIDPolicy").unwrap(),
            r#"<samlp:NameIDPolicy Format="x"/>"#
        );
    }

    #[test]
    fn element_by_id_extracts_whole_element() {
        let xml = r#"<samlp:Response ID="r1"><saml:Assertion ID="a1"><x/></saml:Assertion></samlp:Response>"#;
        let assertion = element_by_id(xml, "a1").unwrap();
        assert!(assertion.starts_with("<saml:Assertion"));
        assert!(assertion.ends_with("</saml:Assertion>"));
        let response = element_by_id(xml, "r1").unwrap();
        assert_eq!(response, xml);
    }

    #[test]
    fn remove_signature_splices_exactly() {
        let xml = "<Root><ds:Signature><ds:SignedInfo/></ds:Signature><Data>x</Data></Root>";
        let removed = remove_signature_element(xml);
        assert_eq!(removed, "<Root><Data>x</Data></Root>");
    }

    #[test]
    fn signature_removal_ignores_signature_value_prefix() {
        let xml = "<Root><ds:SignatureValue>abc</ds:SignatureValue></Root>";
        // No element with local name exactly "Signature".
        assert_eq!(remove_signature_element(xml), xml);
    }

    #[test]
    fn canonicalize_collapses_whitespace() {
        assert_eq!(
            canonicalize("  <a>\n   text  </a>  "),
            "<a> text </a>"
        );
    }

    #[test]
    fn escape_special_chars() {
        assert_eq!(xml_escape(r#"a<b>&"c""#), "a&lt;b&gt;&amp;&quot;c&quot;");
    }
}
