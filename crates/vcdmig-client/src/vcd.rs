use async_trait::async_trait;
use quick_xml::{events::Event as XmlEvent, Reader as XmlReader};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use tracing::{debug, info};
use vcdmig_domain::{Element, DEFAULT_API_VERSION};

use crate::error::{ClientError, PlatformError};
use crate::platform::{query_records, Platform};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Operator credentials for one instance. Collected interactively; never
/// read from the environment or a file.
#[derive(Clone)]
pub struct Credentials {
    pub user:     String,
    pub org:      String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("org", &self.org)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub api_version: String,
    /// Skip TLS certificate verification (self-signed lab instances).
    pub insecure:    bool,
    pub page_size:   u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self { api_version: DEFAULT_API_VERSION.into(), insecure: false, page_size: 128 }
    }
}

// ── Session token ─────────────────────────────────────────────────────────────

const LEGACY_TOKEN_HEADER: &str = "x-vcloud-authorization";
const ACCESS_TOKEN_HEADER: &str = "x-vmware-vcloud-access-token";

#[derive(Clone)]
enum SessionToken {
    /// Pre-10.0 instances: echo the `x-vcloud-authorization` header.
    Legacy(String),
    /// 10.0+: JWT sent as a bearer token.
    Bearer(String),
}

// ── VcdClient ─────────────────────────────────────────────────────────────────

/// An authenticated session against one vCloud Director instance.
pub struct VcdClient {
    label:     String,
    base:      String,
    accept:    String,
    page_size: u32,
    client:    reqwest::Client,
    token:     SessionToken,
}

impl VcdClient {
    /// Log in with `POST /api/sessions`. Fails fast: a rejected login is an
    /// [`ClientError::Auth`] and is never retried.
    pub async fn open_session(
        label: &str,
        endpoint: &str,
        credentials: &Credentials,
        options: &SessionOptions,
    ) -> Result<Self, ClientError> {
        let base = endpoint.trim_end_matches('/').to_string();
        let accept = format!("application/*+xml;version={}", options.api_version);
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(options.insecure)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        info!(label, endpoint = %base, user = %credentials.user, org = %credentials.org, "Opening session");
        let resp = client
            .post(format!("{}/api/sessions", base))
            .header(ACCEPT, &accept)
            .basic_auth(
                format!("{}@{}", credentials.user, credentials.org),
                Some(&credentials.password),
            )
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("login to {}: {}", base, e)))?;

        let status = resp.status();
        let headers = resp.headers().clone();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Auth {
                endpoint: base,
                message: format!("HTTP {}: {}", status.as_u16(), Self::extract_platform_error(&body)),
            });
        }

        let token = Self::session_token(&headers).ok_or_else(|| ClientError::Auth {
            endpoint: base.clone(),
            message: "login succeeded but no session token was returned".into(),
        })?;

        Ok(Self {
            label: label.to_string(),
            base,
            accept,
            page_size: options.page_size,
            client,
            token,
        })
    }

    fn session_token(headers: &HeaderMap) -> Option<SessionToken> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        read(ACCESS_TOKEN_HEADER)
            .map(SessionToken::Bearer)
            .or_else(|| read(LEGACY_TOKEN_HEADER).map(SessionToken::Legacy))
    }

    fn authed(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let rb = rb.header(ACCEPT, &self.accept);
        match &self.token {
            SessionToken::Legacy(t) => rb.header(LEGACY_TOKEN_HEADER, t),
            SessionToken::Bearer(t) => rb.bearer_auth(t),
        }
    }

    /// Accept hrefs as returned by the platform, or paths relative to the base.
    fn absolute(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}/{}", self.base, href.trim_start_matches('/'))
        }
    }

    // ── Platform error parsing ────────────────────────────────────────────────

    /// Read the platform's `<Error majorErrorCode minorErrorCode message>`
    /// body. Falls back to the raw body when it is not a structured error.
    pub fn extract_platform_error(body: &str) -> PlatformError {
        let mut reader = XmlReader::from_str(body);
        reader.config_mut().trim_text(true);

        loop {
            match reader.read_event() {
                Ok(XmlEvent::Start(e)) | Ok(XmlEvent::Empty(e))
                    if e.local_name().as_ref() == b"Error" =>
                {
                    let mut major = None;
                    let mut minor = None;
                    let mut message = None;
                    for attr in e.attributes().flatten() {
                        let value = attr
                            .unescape_value()
                            .map(|v| v.into_owned())
                            .unwrap_or_default();
                        match attr.key.local_name().as_ref() {
                            b"majorErrorCode" => major = Some(value),
                            b"minorErrorCode" => minor = Some(value),
                            b"message" => message = Some(value),
                            _ => {}
                        }
                    }
                    return PlatformError {
                        major,
                        minor,
                        message: message.unwrap_or_else(|| "unknown error".into()),
                    };
                }
                Ok(XmlEvent::Eof) | Err(_) => break,
                _ => {}
            }
        }

        let raw = body.trim();
        PlatformError {
            major:   None,
            minor:   None,
            message: if raw.is_empty() { "empty response body".into() } else { raw.to_string() },
        }
    }

    // ── Request helper ────────────────────────────────────────────────────────

    async fn send(
        &self,
        rb: reqwest::RequestBuilder,
        what: &str,
        read: bool,
    ) -> Result<Element, ClientError> {
        let resp = self
            .authed(rb)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("{}: {}", what, e)))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ClientError::Transport(format!("{}: {}", what, e)))?;

        debug!(label = %self.label, what, status = status.as_u16(), "vCD response");

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Element::default());
            }
            return Ok(Element::parse(&text)?);
        }
        Err(ClientError::from_status(
            status.as_u16(),
            &self.base,
            what,
            read,
            Self::extract_platform_error(&text),
        ))
    }

    async fn query_page(
        &self,
        query_type: &str,
        filter: &str,
        page: u32,
    ) -> Result<Element, ClientError> {
        let mut params = vec![
            ("type", query_type.to_string()),
            ("format", "records".to_string()),
            ("page", page.to_string()),
            ("pageSize", self.page_size.to_string()),
        ];
        if !filter.is_empty() {
            params.push(("filter", filter.to_string()));
        }
        let rb = self.client.get(format!("{}/api/query", self.base)).query(&params);
        self.send(rb, &format!("query {} [{}]", query_type, filter), true)
            .await
    }
}

#[async_trait]
impl Platform for VcdClient {
    fn label(&self) -> &str {
        &self.label
    }

    fn base_url(&self) -> &str {
        &self.base
    }

    async fn query(&self, query_type: &str, filter: &str) -> Result<Vec<Element>, ClientError> {
        let mut records = Vec::new();
        let mut page = 1;
        loop {
            let result = self.query_page(query_type, filter, page).await?;
            records.extend(query_records(&result));
            let has_next = result
                .children_named("Link")
                .any(|l| l.attr("rel") == Some("nextPage"));
            if !has_next {
                break;
            }
            page += 1;
        }
        debug!(query_type, filter, count = records.len(), "Query complete");
        Ok(records)
    }

    async fn get(&self, href: &str) -> Result<Element, ClientError> {
        let url = self.absolute(href);
        self.send(self.client.get(&url), &format!("GET {}", url), true)
            .await
    }

    async fn post(&self, href: &str, media_type: &str, body: &Element) -> Result<Element, ClientError> {
        let url = self.absolute(href);
        let rb = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, media_type)
            .body(body.to_xml()?);
        self.send(rb, &format!("POST {}", url), false).await
    }

    async fn put(&self, href: &str, media_type: &str, body: &Element) -> Result<Element, ClientError> {
        let url = self.absolute(href);
        let rb = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, media_type)
            .body(body.to_xml()?);
        self.send(rb, &format!("PUT {}", url), false).await
    }

    async fn close(&self) -> Result<(), ClientError> {
        let url = format!("{}/api/session", self.base);
        self.send(self.client.delete(&url), "DELETE /api/session", false)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn creds() -> Credentials {
        Credentials { user: "admin".into(), org: "System".into(), password: "pw".into() }
    }

    async fn logged_in(server: &MockServer) -> VcdClient {
        Mock::given(method("POST"))
            .and(path("/api/sessions"))
            .respond_with(ResponseTemplate::new(200).insert_header(LEGACY_TOKEN_HEADER, "tok-1"))
            .mount(server)
            .await;
        VcdClient::open_session("source", &server.uri(), &creds(), &SessionOptions::default())
            .await
            .unwrap()
    }

    // ── Error parsing (pure, no mocking) ──────────────────────────────────────

    #[test]
    fn parse_structured_error() {
        let body = r#"<?xml version="1.0"?>
<Error xmlns="http://www.vmware.com/vcloud/v1.5" majorErrorCode="400"
       minorErrorCode="DUPLICATE_NAME" message="The name Acme is already in use."/>"#;
        let err = VcdClient::extract_platform_error(body);
        assert_eq!(err.major.as_deref(), Some("400"));
        assert_eq!(err.minor.as_deref(), Some("DUPLICATE_NAME"));
        assert_eq!(err.message, "The name Acme is already in use.");
        assert_eq!(err.to_string(), "DUPLICATE_NAME: The name Acme is already in use.");
    }

    #[test]
    fn unstructured_error_falls_back_to_raw_body() {
        let err = VcdClient::extract_platform_error("  Service Unavailable ");
        assert_eq!(err.minor, None);
        assert_eq!(err.message, "Service Unavailable");
    }

    #[test]
    fn duplicate_name_is_a_conflict() {
        let err = ClientError::from_status(
            400,
            "https://vcd",
            "POST orgs",
            false,
            PlatformError { major: None, minor: Some("DUPLICATE_NAME".into()), message: "dup".into() },
        );
        assert!(matches!(err, ClientError::Conflict { .. }));
    }

    #[test]
    fn forbidden_read_is_not_found() {
        let pe = PlatformError { major: None, minor: None, message: "forbidden".into() };
        assert!(ClientError::from_status(403, "b", "GET x", true, pe.clone()).is_not_found());
        assert!(matches!(
            ClientError::from_status(403, "b", "POST x", false, pe),
            ClientError::Platform { status: 403, .. }
        ));
    }

    // ── Session ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn login_failure_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sessions"))
            .respond_with(ResponseTemplate::new(401).set_body_string(
                r#"<Error majorErrorCode="401" minorErrorCode="UNAUTHORIZED" message="Bad credentials"/>"#,
            ))
            .mount(&server)
            .await;

        let err = VcdClient::open_session("target", &server.uri(), &creds(), &SessionOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Auth { .. }));
        assert!(err.to_string().contains("Bad credentials"));
    }

    #[tokio::test]
    async fn bearer_token_preferred_when_present() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sessions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(LEGACY_TOKEN_HEADER, "legacy")
                    .insert_header(ACCESS_TOKEN_HEADER, "jwt"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/admin/org/1"))
            .and(header("authorization", "Bearer jwt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<AdminOrg name="Acme"/>"#))
            .mount(&server)
            .await;

        let client = VcdClient::open_session("source", &server.uri(), &creds(), &SessionOptions::default())
            .await
            .unwrap();
        let org = client.get(&format!("{}/api/admin/org/1", server.uri())).await.unwrap();
        assert_eq!(org.attr("name"), Some("Acme"));
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/admin/vdc/missing"))
            .and(header(LEGACY_TOKEN_HEADER, "tok-1"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client.get("/api/admin/vdc/missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn post_rejection_is_validation_error() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/admin/orgs"))
            .and(header("content-type", "application/vnd.vmware.admin.organization+xml"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"<Error minorErrorCode="BAD_REQUEST" message="FullName is required"/>"#,
            ))
            .mount(&server)
            .await;

        let body = Element::new("AdminOrg").with_attr("name", "Acme");
        let err = client
            .post("/api/admin/orgs", "application/vnd.vmware.admin.organization+xml", &body)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation { .. }));
        assert!(err.to_string().contains("FullName is required"));
    }

    #[tokio::test]
    async fn query_follows_next_page_links() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("type", "organization"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<QueryResultRecords total="2">
                     <Link rel="nextPage" href="/api/query?page=2"/>
                     <OrgRecord name="Acme" href="https://vcd/api/org/1"/>
                   </QueryResultRecords>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("type", "organization"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<QueryResultRecords total="2">
                     <OrgRecord name="Acme-Dev" href="https://vcd/api/org/2"/>
                   </QueryResultRecords>"#,
            ))
            .mount(&server)
            .await;

        let records = client.query("organization", "name==Acme*").await.unwrap();
        let names: Vec<_> = records.iter().filter_map(|r| r.attr("name")).collect();
        assert_eq!(names, ["Acme", "Acme-Dev"]);
    }

    #[tokio::test]
    async fn close_deletes_session() {
        let server = MockServer::start().await;
        let client = logged_in(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/api/session"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client.close().await.unwrap();
    }
}
