//! vCenter REST connector
//!
//! Talks to the vCenter Automation API (`/api/...`). A login exchanges basic
//! credentials for a session token sent in the `vmware-api-session-id`
//! header on every later call.

use crate::domain::ports::{ConnectTarget, Datacenter, VcenterClient, VcenterConnector};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const SESSION_HEADER: &str = "vmware-api-session-id";
const SESSION_PATH: &str = "api/session";
const DATACENTER_PATH: &str = "api/vcenter/datacenter";
const VERSION_PATH: &str = "api/appliance/system/version";

/// Connector creating REST sessions against vCenter
#[derive(Debug, Clone)]
pub struct RestConnector {
    timeout: Duration,
}

impl RestConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// HTTP client for one vCenter.
    ///
    /// With a thumbprint the handshake itself rejects any other certificate,
    /// so no request leaves the client before the pin holds. Without one
    /// every certificate is accepted.
    fn build_client(&self, target: &ConnectTarget) -> Result<Client> {
        let builder = Client::builder().timeout(self.timeout);
        let builder = match &target.thumbprint {
            Some(expected) => builder.use_preconfigured_tls(pinned_tls_config(expected)),
            None => builder.danger_accept_invalid_certs(true),
        };
        builder.build().map_err(|e| Error::Connection {
            server: target.server.clone(),
            reason: e.to_string(),
        })
    }
}

impl Default for RestConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl VcenterConnector for RestConnector {
    async fn login(
        &self,
        target: &ConnectTarget,
        username: &str,
        password: &str,
    ) -> Result<Arc<dyn VcenterClient>> {
        let http = self.build_client(target)?;
        let mut client = RestClient {
            http,
            target: target.clone(),
            token: String::new(),
            version: String::new(),
        };

        let response = client
            .send(
                client
                    .http
                    .post(client.url(SESSION_PATH)?)
                    .basic_auth(username, Some(password)),
            )
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::Auth {
                    server: target.server.clone(),
                })
            }
            status => return Err(client.connection_error(format!("login returned {}", status))),
        }
        client.token = response.json::<String>().await?;

        client.version = match client.fetch_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!("Could not read version of vCenter {}: {}", target.server, e);
                String::new()
            }
        };
        debug!("Logged in to vCenter {} ({})", target.server, client.version);

        Ok(Arc::new(client))
    }
}

// =============================================================================
// Session Client
// =============================================================================

struct RestClient {
    http: Client,
    target: ConnectTarget,
    token: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct DatacenterSummary {
    datacenter: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApplianceVersion {
    version: String,
}

impl RestClient {
    fn url(&self, path: &str) -> Result<reqwest::Url> {
        self.target
            .url
            .join(path)
            .map_err(|e| self.connection_error(e.to_string()))
    }

    fn connection_error(&self, reason: String) -> Error {
        Error::Connection {
            server: self.target.server.clone(),
            reason,
        }
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(SESSION_HEADER, &self.token)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| self.connection_error(e.to_string()))
    }

    async fn fetch_version(&self) -> Result<String> {
        let response = self
            .send(self.authed(self.http.get(self.url(VERSION_PATH)?)))
            .await?
            .error_for_status()?;
        Ok(response.json::<ApplianceVersion>().await?.version)
    }
}

#[async_trait]
impl VcenterClient for RestClient {
    async fn is_active(&self) -> Result<bool> {
        let response = self
            .send(self.authed(self.http.get(self.url(SESSION_PATH)?)))
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::UNAUTHORIZED => Ok(false),
            status => Err(self.connection_error(format!("session probe returned {}", status))),
        }
    }

    async fn find_datacenter(&self, name: &str) -> Result<Option<Datacenter>> {
        let mut url = self.url(DATACENTER_PATH)?;
        url.set_query(Some(&format!("names={}", urlencoding::encode(name))));

        let response = self
            .send(self.authed(self.http.get(url)))
            .await?
            .error_for_status()?;
        let summaries: Vec<DatacenterSummary> = response.json().await?;

        Ok(summaries
            .into_iter()
            .find(|dc| dc.name == name)
            .map(|dc| Datacenter {
                id: dc.datacenter,
                name: dc.name,
            }))
    }

    fn server_version(&self) -> &str {
        &self.version
    }
}

// =============================================================================
// Thumbprints
// =============================================================================

/// SHA-1 fingerprint of a DER certificate as colon separated upper hex
pub fn thumbprint(der: &[u8]) -> String {
    let digest = Sha1::digest(der);
    digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Certificate verifier accepting exactly one leaf certificate.
///
/// The chain and server name are not checked; the SHA-1 thumbprint of the
/// end-entity certificate is the only trust anchor.
#[derive(Debug)]
struct ThumbprintVerifier {
    expected: String,
}

impl ServerCertVerifier for ThumbprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let actual = thumbprint(&end_entity.0);
        if thumbprints_match(&actual, &self.expected) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(format!(
                "certificate thumbprint {} does not match {}",
                actual, self.expected
            )))
        }
    }
}

fn pinned_tls_config(expected: &str) -> ClientConfig {
    ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(ThumbprintVerifier {
            expected: expected.to_string(),
        }))
        .with_no_client_auth()
}

/// Compare thumbprints ignoring case and separators
pub fn thumbprints_match(a: &str, b: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_ascii_hexdigit())
            .map(|c| c.to_ascii_uppercase())
            .collect()
    };
    let (a, b) = (normalize(a), normalize(b));
    !a.is_empty() && a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbprint_format() {
        // SHA-1 of the empty input
        assert_eq!(
            thumbprint(b""),
            "DA:39:A3:EE:5E:6B:4B:0D:32:55:BF:EF:95:60:18:90:AF:D8:07:09"
        );
    }

    #[test]
    fn test_thumbprints_match() {
        let pinned = "da:39:a3:ee:5e:6b:4b:0d:32:55:bf:ef:95:60:18:90:af:d8:07:09";
        assert!(thumbprints_match(&thumbprint(b""), pinned));
        assert!(!thumbprints_match(&thumbprint(b"other"), pinned));
        assert!(!thumbprints_match("", ""));
    }

    fn verify(verifier: &ThumbprintVerifier, der: &[u8]) -> std::result::Result<(), rustls::Error> {
        let server_name = ServerName::try_from("vc.local").unwrap();
        verifier
            .verify_server_cert(
                &Certificate(der.to_vec()),
                &[],
                &server_name,
                &mut std::iter::empty(),
                &[],
                SystemTime::now(),
            )
            .map(|_| ())
    }

    #[test]
    fn test_pinned_handshake_rejects_other_certificate() {
        let verifier = ThumbprintVerifier {
            expected: "da:39:a3:ee:5e:6b:4b:0d:32:55:bf:ef:95:60:18:90:af:d8:07:09".into(),
        };
        assert!(verify(&verifier, b"").is_ok());

        let err = verify(&verifier, b"attacker").unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_pinned_client_builds() {
        let connector = RestConnector::default();
        let target = ConnectTarget {
            server: "vc.local".into(),
            url: reqwest::Url::parse("https://vc.local/").unwrap(),
            thumbprint: Some(thumbprint(b"")),
        };
        assert!(connector.build_client(&target).is_ok());
    }

    #[test]
    fn test_rest_urls() {
        let client = RestClient {
            http: Client::new(),
            target: ConnectTarget {
                server: "vc.local".into(),
                url: reqwest::Url::parse("https://vc.local/").unwrap(),
                thumbprint: None,
            },
            token: String::new(),
            version: String::new(),
        };
        assert_eq!(
            client.url(SESSION_PATH).unwrap().as_str(),
            "https://vc.local/api/session"
        );
    }
}
