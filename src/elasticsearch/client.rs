//! Elasticsearch Security API client with ordered host failover

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ElasticsearchConfig;
use crate::security::{redact_text, redact_value};
use crate::{Error, Result};

/// Timeout applied to every admin call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Groups stored alongside the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ElasticsearchUserMetadata {
    /// Identity-provider groups at the time of the upsert
    pub groups: Vec<String>,
}

/// Body of `POST /_security/user/{username}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ElasticsearchUser {
    /// Always `true`; disabled users cannot authenticate
    pub enabled: bool,
    /// Email address, empty when unknown
    pub email: String,
    /// Generated password in plaintext
    pub password: String,
    /// Extra user metadata
    pub metadata: ElasticsearchUserMetadata,
    /// Display name, empty when unknown
    pub full_name: String,
    /// Resolved role names
    pub roles: Vec<String>,
}

/// Admin client for the Security API.
///
/// Hosts are tried in configuration order; a request fails only once every
/// host has failed. No single host is retried.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    http: Client,
    hosts: Vec<Url>,
    username: String,
    password: String,
}

impl ElasticsearchClient {
    /// Build a client from configuration.
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        if config.hosts.is_empty() {
            return Err(Error::Config("no Elasticsearch hosts configured".into()));
        }
        let hosts = config
            .hosts
            .iter()
            .map(|h| {
                Url::parse(h).map_err(|e| Error::Config(format!("invalid Elasticsearch host {h}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Config(format!("failed to build Elasticsearch client: {e}")))?;

        Ok(Self {
            http,
            hosts,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Configured hosts, in failover order
    #[must_use]
    pub fn hosts(&self) -> &[Url] {
        &self.hosts
    }

    /// `GET {host}/` with admin credentials. Returns the cluster banner.
    pub async fn ping(&self) -> Result<Value> {
        let (host, resp) = self
            .send_with_failover("ping", |host| Ok(self.http.get(host.clone())))
            .await?;
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let cluster = body.get("cluster_name").and_then(Value::as_str).unwrap_or("unknown");
        let version = body
            .pointer("/version/number")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(host = %host, cluster, version, "Connected to Elasticsearch");
        debug!(body = %redact_value(&body), "Elasticsearch ping response");
        Ok(body)
    }

    /// Create or update `username` through the Security API.
    pub async fn upsert_user(&self, username: &str, user: &ElasticsearchUser) -> Result<()> {
        let (host, resp) = self
            .send_with_failover("upsert_user", |host| {
                Ok(self.http.post(user_url(host, username)?).json(user))
            })
            .await?;
        let body = resp.text().await.unwrap_or_default();
        debug!(
            host = %host,
            username,
            response = %redact_text(&body),
            "Upserted Elasticsearch user"
        );
        Ok(())
    }

    async fn send_with_failover<F>(
        &self,
        operation: &'static str,
        build: F,
    ) -> Result<(Url, reqwest::Response)>
    where
        F: Fn(&Url) -> Result<RequestBuilder>,
    {
        let mut rejected: Option<Error> = None;
        let mut unreachable: Vec<String> = Vec::new();

        for host in &self.hosts {
            let request = build(host)?.basic_auth(&self.username, Some(&self.password));
            match request.send().await {
                Ok(resp) if resp.status() == StatusCode::OK => return Ok((host.clone(), resp)),
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = redact_text(&resp.text().await.unwrap_or_default());
                    warn!(host = %host, operation, status, body = %body, "Elasticsearch rejected request");
                    rejected = Some(Error::ElasticsearchRejected { status, body });
                }
                Err(e) => {
                    warn!(host = %host, operation, error = %e, "Elasticsearch host unreachable");
                    unreachable.push(format!("{host}: {e}"));
                }
            }
        }

        Err(rejected.unwrap_or_else(|| Error::ElasticsearchUnreachable(unreachable.join("; "))))
    }
}

/// `{host}/_security/user/{username}` with the username percent-encoded as
/// a single path segment.
fn user_url(host: &Url, username: &str) -> Result<Url> {
    let mut url = host.clone();
    url.path_segments_mut()
        .map_err(|()| Error::Config(format!("Elasticsearch host {host} cannot be a base URL")))?
        .pop_if_empty()
        .extend(["_security", "user", username]);
    Ok(url)
}
