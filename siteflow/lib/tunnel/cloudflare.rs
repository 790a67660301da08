use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{config::CloudflareConfig, state::TimedCache, SiteflowError, SiteflowResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Tunnel status is refreshed at most this often.
const STATUS_TTL: Duration = Duration::from_secs(30);

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An active connector of the tunnel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelConnector {
    /// Connector id.
    pub id: String,
    /// Client version.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub version: Option<String>,
    /// Data-center location.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<String>,
}

/// A public hostname routed through the tunnel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelHostname {
    /// Public hostname.
    pub hostname: String,
    /// Origin service URL.
    pub service: String,
}

/// The tunnel with its live connections and routed hostnames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelInfo {
    /// Tunnel id.
    pub id: String,
    /// Tunnel name.
    pub name: String,
    /// Provider-reported status.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<String>,
    /// Active connectors.
    #[serde(default)]
    pub connections: Vec<TunnelConnector>,
    /// Routed hostnames.
    #[serde(default)]
    pub hostnames: Vec<TunnelHostname>,
}

/// Provider status as consumed by the topology builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TunnelStatus {
    /// The tunnel, when the provider is configured and reachable.
    pub tunnel: Option<TunnelInfo>,
}

/// Operations siteflow needs from the DNS/tunnel provider.
///
/// Removals signal an already-absent resource as
/// [`SiteflowError::Integrity`]; callers on idempotent paths log the
/// divergence at warn and treat it as success.
#[async_trait]
pub trait TunnelService: Send + Sync {
    /// Current tunnel status, cached unless forced.
    async fn status(&self, force_refresh: bool) -> SiteflowResult<TunnelStatus>;

    /// Creates the DNS record routing `domain` through the tunnel.
    async fn add_dns_record(&self, domain: &str) -> SiteflowResult<()>;

    /// Removes the DNS record for `domain`.
    async fn remove_dns_record(&self, domain: &str) -> SiteflowResult<()>;

    /// Registers `domain` as a public hostname on the tunnel.
    async fn add_public_hostname(&self, domain: &str, service_url: &str) -> SiteflowResult<()>;

    /// Unregisters `domain` from the tunnel.
    async fn remove_public_hostname(&self, domain: &str) -> SiteflowResult<()>;
}

/// The Cloudflare-backed implementation.
pub struct CloudflareClient {
    config: CloudflareConfig,
    http: reqwest::Client,
    cache: TimedCache<TunnelStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<T>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CloudflareClient {
    /// Creates a client; inert when credentials are missing.
    pub fn new(config: CloudflareConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("reqwest client builds");
        Self {
            config,
            http,
            cache: TimedCache::new(STATUS_TTL),
        }
    }

    fn configured(&self) -> bool {
        self.config.account_id.is_some()
            && self.config.api_token.is_some()
            && self.config.tunnel_id.is_some()
    }

    fn token(&self) -> &str {
        self.config.api_token.as_deref().unwrap_or_default()
    }

    fn account_path(&self, suffix: &str) -> String {
        format!(
            "{API_BASE}/accounts/{}/cfd_tunnel/{}{suffix}",
            self.config.account_id.as_deref().unwrap_or_default(),
            self.config.tunnel_id.as_deref().unwrap_or_default(),
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> SiteflowResult<Option<T>> {
        let response = self
            .http
            .get(url)
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| SiteflowError::Transport(format!("cloudflare request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(SiteflowError::Transport(format!(
                "cloudflare returned {} for {url}",
                response.status()
            )));
        }
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| SiteflowError::Transport(format!("cloudflare response malformed: {e}")))?;
        if !envelope.success {
            return Err(SiteflowError::Transport(format!(
                "cloudflare reported failure for {url}"
            )));
        }
        Ok(envelope.result)
    }

    async fn send_json(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> SiteflowResult<serde_json::Value> {
        let mut request = self.http.request(method, url).bearer_auth(self.token());
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SiteflowError::Transport(format!("cloudflare request failed: {e}")))?;
        let status = response.status();
        let value: serde_json::Value = response.json().await.unwrap_or_default();
        if !status.is_success() || value.get("success").and_then(|v| v.as_bool()) != Some(true) {
            return Err(SiteflowError::Transport(format!(
                "cloudflare returned {status} for {url}: {value}"
            )));
        }
        Ok(value)
    }

    async fn fetch_status(&self) -> SiteflowResult<TunnelStatus> {
        #[derive(Deserialize)]
        struct RawTunnel {
            id: String,
            name: String,
            #[serde(default)]
            status: Option<String>,
        }
        #[derive(Deserialize)]
        struct RawConnection {
            id: String,
            #[serde(default)]
            client_version: Option<String>,
            #[serde(default)]
            data_center: Option<String>,
        }
        #[derive(Deserialize)]
        struct RawHostname {
            hostname: String,
            service: String,
        }

        let tunnel: Option<RawTunnel> = self.get_json(&self.account_path("")).await?;
        let Some(tunnel) = tunnel else {
            return Ok(TunnelStatus { tunnel: None });
        };

        let connections: Vec<RawConnection> = self
            .get_json(&self.account_path("/connections"))
            .await?
            .unwrap_or_default();
        let hostnames: Vec<RawHostname> = self
            .get_json(&self.account_path("/hostnames"))
            .await?
            .unwrap_or_default();

        Ok(TunnelStatus {
            tunnel: Some(TunnelInfo {
                id: tunnel.id,
                name: tunnel.name,
                status: tunnel.status,
                connections: connections
                    .into_iter()
                    .map(|c| TunnelConnector {
                        id: c.id,
                        version: c.client_version,
                        location: c.data_center,
                    })
                    .collect(),
                hostnames: hostnames
                    .into_iter()
                    .map(|h| TunnelHostname {
                        hostname: h.hostname,
                        service: h.service,
                    })
                    .collect(),
            }),
        })
    }

    async fn dns_record_id(&self, domain: &str) -> SiteflowResult<Option<String>> {
        let Some(zone_id) = &self.config.zone_id else {
            return Ok(None);
        };
        #[derive(Deserialize)]
        struct RawRecord {
            id: String,
        }
        let url = format!("{API_BASE}/zones/{zone_id}/dns_records?name={domain}");
        let records: Vec<RawRecord> = self.get_json(&url).await?.unwrap_or_default();
        Ok(records.into_iter().next().map(|r| r.id))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl TunnelService for CloudflareClient {
    async fn status(&self, force_refresh: bool) -> SiteflowResult<TunnelStatus> {
        if !self.configured() {
            return Ok(TunnelStatus::default());
        }
        let status = self
            .cache
            .get_with(force_refresh, || self.fetch_status())
            .await?;
        Ok((*status).clone())
    }

    async fn add_dns_record(&self, domain: &str) -> SiteflowResult<()> {
        if !self.configured() {
            tracing::debug!(domain, "tunnel provider not configured, skipping DNS record");
            return Ok(());
        }
        let Some(zone_id) = &self.config.zone_id else {
            tracing::warn!(domain, "no DNS zone configured, skipping DNS record");
            return Ok(());
        };
        let tunnel_id = self.config.tunnel_id.as_deref().unwrap_or_default();
        let url = format!("{API_BASE}/zones/{zone_id}/dns_records");
        self.send_json(
            reqwest::Method::POST,
            &url,
            Some(json!({
                "type": "CNAME",
                "name": domain,
                "content": format!("{tunnel_id}.cfargotunnel.com"),
                "proxied": true,
            })),
        )
        .await?;
        tracing::info!(domain, "created DNS record");
        Ok(())
    }

    async fn remove_dns_record(&self, domain: &str) -> SiteflowResult<()> {
        if !self.configured() {
            return Ok(());
        }
        let Some(record_id) = self.dns_record_id(domain).await? else {
            return Err(SiteflowError::Integrity(format!(
                "DNS record for {domain} already absent"
            )));
        };
        let zone_id = self.config.zone_id.as_deref().unwrap_or_default();
        let url = format!("{API_BASE}/zones/{zone_id}/dns_records/{record_id}");
        self.send_json(reqwest::Method::DELETE, &url, None).await?;
        tracing::info!(domain, "removed DNS record");
        Ok(())
    }

    async fn add_public_hostname(&self, domain: &str, service_url: &str) -> SiteflowResult<()> {
        if !self.configured() {
            tracing::debug!(domain, "tunnel provider not configured, skipping hostname");
            return Ok(());
        }
        let url = self.account_path("/configurations");
        let current = self.send_json(reqwest::Method::GET, &url, None).await?;
        let mut ingress = current["result"]["config"]["ingress"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        // Drop any existing rule for the hostname, then any catch-all, then
        // re-append rule + catch-all.
        ingress.retain(|rule| {
            rule.get("hostname").and_then(|h| h.as_str()) != Some(domain)
                && rule.get("hostname").is_some()
        });
        ingress.push(json!({"hostname": domain, "service": service_url}));
        ingress.push(json!({"service": "http_status:404"}));

        self.send_json(
            reqwest::Method::PUT,
            &url,
            Some(json!({"config": {"ingress": ingress}})),
        )
        .await?;
        tracing::info!(domain, service_url, "registered tunnel hostname");
        Ok(())
    }

    async fn remove_public_hostname(&self, domain: &str) -> SiteflowResult<()> {
        if !self.configured() {
            return Ok(());
        }
        let url = self.account_path("/configurations");
        let current = self.send_json(reqwest::Method::GET, &url, None).await?;
        let Some(existing) = current["result"]["config"]["ingress"].as_array() else {
            return Err(SiteflowError::Integrity(format!(
                "tunnel has no ingress configuration while removing {domain}"
            )));
        };

        let mut ingress: Vec<serde_json::Value> = existing
            .iter()
            .filter(|rule| rule.get("hostname").and_then(|h| h.as_str()) != Some(domain))
            .cloned()
            .collect();
        if ingress.len() == existing.len() {
            return Err(SiteflowError::Integrity(format!(
                "tunnel hostname {domain} already absent"
            )));
        }
        if !ingress.iter().any(|rule| rule.get("hostname").is_none()) {
            ingress.push(json!({"service": "http_status:404"}));
        }

        self.send_json(
            reqwest::Method::PUT,
            &url,
            Some(json!({"config": {"ingress": ingress}})),
        )
        .await?;
        tracing::info!(domain, "unregistered tunnel hostname");
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_client_is_inert() {
        let client = CloudflareClient::new(CloudflareConfig::default());
        let status = client.status(true).await.unwrap();
        assert!(status.tunnel.is_none());
        client.add_dns_record("blog.example.com").await.unwrap();
        client.remove_dns_record("blog.example.com").await.unwrap();
        client
            .add_public_hostname("blog.example.com", "http://localhost:80")
            .await
            .unwrap();
        client.remove_public_hostname("blog.example.com").await.unwrap();
    }
}
