//! vCenter session cache
//!
//! Sessions are keyed by endpoint and username. A cached session is handed
//! out only while the server reports it active and it was created for the
//! same ordered datacenter list; anything else logs in again and replaces
//! the entry.
//!
//! The map sits behind one async mutex that stays locked across the whole
//! login sequence. Concurrent requests for the same endpoint therefore wait
//! for a single login instead of racing several, at the cost of serialising
//! logins to unrelated endpoints.

use crate::domain::ports::{ConnectTarget, Datacenter, VcenterClient, VcenterConnectorRef};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use prometheus::IntCounter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// An authenticated connection to one vCenter
pub struct Session {
    /// Cache key, `<endpoint>#<username>`
    pub key: String,
    pub client: Arc<dyn VcenterClient>,
    /// Datacenters resolved at login, in request order
    pub datacenters: Vec<Datacenter>,
    /// vCenter version reported at login
    pub version: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn datacenter_names(&self) -> Vec<&str> {
        self.datacenters.iter().map(|dc| dc.name.as_str()).collect()
    }

    fn serves(&self, datacenters: &[String]) -> bool {
        self.datacenters.len() == datacenters.len()
            && self
                .datacenters
                .iter()
                .zip(datacenters)
                .all(|(dc, name)| &dc.name == name)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("datacenters", &self.datacenters)
            .field("version", &self.version)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Parameters of a session lookup
#[derive(Debug, Clone, Copy)]
pub struct SessionRequest<'a> {
    pub endpoint: &'a str,
    pub datacenters: &'a [String],
    pub username: &'a str,
    pub password: &'a str,
    pub thumbprint: Option<&'a str>,
}

impl SessionRequest<'_> {
    /// Password and thumbprint are not part of the key
    pub fn key(&self) -> String {
        format!("{}#{}", self.endpoint, self.username)
    }
}

/// Shared cache of vCenter sessions
pub struct SessionCache {
    connector: VcenterConnectorRef,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    logins: IntCounter,
}

impl SessionCache {
    /// Create a cache; `logins` counts every successful login
    pub fn new(connector: VcenterConnectorRef, logins: IntCounter) -> Self {
        Self {
            connector,
            sessions: Mutex::new(HashMap::new()),
            logins,
        }
    }

    /// Return a live session for the request, logging in when needed
    pub async fn get_or_create(&self, request: SessionRequest<'_>) -> Result<Arc<Session>> {
        let key = request.key();
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(&key) {
            if session.serves(request.datacenters) {
                match session.client.is_active().await {
                    Ok(true) => {
                        debug!("Reusing vCenter session {}", key);
                        return Ok(session.clone());
                    }
                    Ok(false) => info!("vCenter session {} expired, logging in again", key),
                    Err(e) => warn!("Liveness probe for session {} failed: {}", key, e),
                }
            } else {
                info!(
                    "Datacenters for session {} changed from {:?} to {:?}",
                    key,
                    session.datacenter_names(),
                    request.datacenters
                );
            }
        }

        let session = Arc::new(self.login(&key, &request).await?);
        sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Number of logins performed so far
    pub fn login_count(&self) -> u64 {
        self.logins.get()
    }

    /// Number of cached sessions
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn login(&self, key: &str, request: &SessionRequest<'_>) -> Result<Session> {
        let target = ConnectTarget {
            server: request.endpoint.to_string(),
            url: parse_endpoint(request.endpoint)?,
            thumbprint: request.thumbprint.map(str::to_string),
        };

        info!("Logging in to vCenter {} as {}", request.endpoint, request.username);
        let client = self
            .connector
            .login(&target, request.username, request.password)
            .await?;
        self.logins.inc();

        let mut datacenters = Vec::with_capacity(request.datacenters.len());
        for name in request.datacenters {
            let datacenter = client.find_datacenter(name).await?.ok_or_else(|| {
                Error::DatacenterNotFound {
                    server: request.endpoint.to_string(),
                    datacenter: name.clone(),
                }
            })?;
            datacenters.push(datacenter);
        }

        Ok(Session {
            key: key.to_string(),
            version: client.server_version().to_string(),
            client,
            datacenters,
            created_at: Utc::now(),
        })
    }
}

/// Turn a user supplied endpoint into a base URL, defaulting to https
pub fn parse_endpoint(endpoint: &str) -> Result<reqwest::Url> {
    let connection_error = |reason: String| Error::Connection {
        server: endpoint.to_string(),
        reason,
    };

    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(connection_error("empty endpoint".to_string()));
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = reqwest::Url::parse(&candidate).map_err(|e| connection_error(e.to_string()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(connection_error("endpoint has no host".to_string()));
    }
    Ok(url)
}
