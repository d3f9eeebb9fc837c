//! SOAP envelope construction and WS-Security UsernameToken authentication.

use super::xml;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

pub mod ns {
    pub const SOAP_ENV: &str = "http://www.w3.org/2003/05/soap-envelope";
    pub const DEVICE: &str = "http://www.onvif.org/ver10/device/wsdl";
    pub const MEDIA: &str = "http://www.onvif.org/ver10/media/wsdl";
    pub const PTZ: &str = "http://www.onvif.org/ver20/ptz/wsdl";
    pub const EVENTS: &str = "http://www.onvif.org/ver10/events/wsdl";
    pub const ANALYTICS: &str = "http://www.onvif.org/ver20/analytics/wsdl";
    pub const IMAGING: &str = "http://www.onvif.org/ver20/imaging/wsdl";
    pub const SCHEMA: &str = "http://www.onvif.org/ver10/schema";
    pub const NOTIFICATION: &str = "http://docs.oasis-open.org/wsn/b-2";
    pub const WSSE: &str =
        "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
    pub const WSU: &str =
        "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
}

const PASSWORD_DIGEST: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";
const BASE64_BINARY: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// `Base64(SHA1(nonce + created + password))`
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

pub fn security_header(credentials: &Credentials) -> String {
    let nonce: [u8; 16] = rand::random();
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    security_header_with(credentials, &nonce, &created)
}

fn security_header_with(credentials: &Credentials, nonce: &[u8], created: &str) -> String {
    let digest = password_digest(nonce, created, &credentials.password);
    format!(
        r#"<wsse:Security s:mustUnderstand="1" xmlns:wsse="{wsse}" xmlns:wsu="{wsu}">
      <wsse:UsernameToken>
        <wsse:Username>{username}</wsse:Username>
        <wsse:Password Type="{digest_type}">{digest}</wsse:Password>
        <wsse:Nonce EncodingType="{nonce_type}">{nonce}</wsse:Nonce>
        <wsu:Created>{created}</wsu:Created>
      </wsse:UsernameToken>
    </wsse:Security>"#,
        wsse = ns::WSSE,
        wsu = ns::WSU,
        username = xml::escape_text(&credentials.username),
        digest_type = PASSWORD_DIGEST,
        digest = digest,
        nonce_type = BASE64_BINARY,
        nonce = STANDARD.encode(nonce),
        created = created,
    )
}

/// Wrap a body in a SOAP 1.2 envelope declaring every prefix the crate uses.
pub fn envelope(credentials: Option<&Credentials>, body: &str) -> String {
    let header = credentials
        .filter(|c| !c.username.is_empty())
        .map(|c| format!("<s:Header>\n    {}\n  </s:Header>", security_header(c)))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{env}" xmlns:tds="{device}" xmlns:trt="{media}" xmlns:tptz="{ptz}" xmlns:tev="{events}" xmlns:tt="{schema}" xmlns:wsnt="{wsnt}">
  {header}
  <s:Body>
    {body}
  </s:Body>
</s:Envelope>"#,
        env = ns::SOAP_ENV,
        device = ns::DEVICE,
        media = ns::MEDIA,
        ptz = ns::PTZ,
        events = ns::EVENTS,
        schema = ns::SCHEMA,
        wsnt = ns::NOTIFICATION,
        header = header,
        body = body,
    )
}

/// Reason text of a SOAP fault, if the document is one.
pub fn fault_reason(document: &str) -> Option<String> {
    let fault = xml::elements(document, "Fault").into_iter().next()?;
    let reason = fault
        .text("Text")
        .or_else(|| fault.text("faultstring"))
        .or_else(|| fault.child("Subcode").and_then(|s| s.text("Value")))
        .unwrap_or_else(|| "unspecified SOAP fault".to_string());
    Some(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_digest_is_deterministic() {
        // Example from the WS-Security UsernameToken profile.
        let nonce = STANDARD.decode("LKqI6G/AikKCQrN0zqZFlg==").unwrap();
        let digest = password_digest(&nonce, "2010-09-16T07:50:45Z", "userpassword");
        assert_eq!(digest, "tuOSpGlFlIXsozq4HFNeeGeFLEI=");
    }

    #[test]
    fn test_security_header_fields() {
        let creds = Credentials::new("admin", "secret");
        let header = security_header_with(&creds, &[1u8; 16], "2024-05-01T10:00:00Z");
        assert!(header.contains("<wsse:Username>admin</wsse:Username>"));
        assert!(header.contains("#PasswordDigest"));
        assert!(header.contains("<wsu:Created>2024-05-01T10:00:00Z</wsu:Created>"));
        assert!(!header.contains("secret"));
    }

    #[test]
    fn test_envelope_without_credentials_has_no_header() {
        let doc = envelope(None, "<tds:GetSystemDateAndTime/>");
        assert!(!doc.contains("s:Header"));
        assert!(doc.contains("<tds:GetSystemDateAndTime/>"));

        let doc = envelope(Some(&Credentials::new("admin", "pw")), "<tds:GetServices/>");
        assert!(doc.contains("<s:Header>"));
    }

    #[test]
    fn test_fault_reason() {
        let fault = r#"<s:Envelope><s:Body><s:Fault>
            <s:Code><s:Value>s:Sender</s:Value></s:Code>
            <s:Reason><s:Text xml:lang="en">Sender not Authorized</s:Text></s:Reason>
        </s:Fault></s:Body></s:Envelope>"#;
        assert_eq!(fault_reason(fault).as_deref(), Some("Sender not Authorized"));
        assert_eq!(fault_reason("<s:Envelope><s:Body/></s:Envelope>"), None);
    }
}
