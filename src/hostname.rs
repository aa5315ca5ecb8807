//! Discovery of the externally visible hostname.
//!
//! The hostname is resolved once, before the index is built, and embedded in
//! every chart download URL.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{RepoError, RepoResult};

/// Directory where Kubernetes mounts the service account credentials.
pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const INGRESS_CONTROLLER_PATH: &str =
    "/apis/operator.openshift.io/v1/namespaces/openshift-ingress-operator/ingresscontrollers/default";

/// Something that can tell the server which hostname clients reach it on.
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    /// Resolve the hostname.
    async fn resolve(&self) -> RepoResult<String>;
}

/// A fixed, configured hostname.
#[derive(Debug, Clone)]
pub struct StaticHostname(pub String);

#[async_trait]
impl HostnameResolver for StaticHostname {
    async fn resolve(&self) -> RepoResult<String> {
        validate_hostname(&self.0)
    }
}

/// Looks up the cluster's default ingress domain through the Kubernetes API.
#[derive(Debug, Clone)]
pub struct IngressDomainResolver {
    api_url: String,
    token_path: PathBuf,
    ca_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct IngressController {
    status: Option<IngressControllerStatus>,
}

#[derive(Debug, Deserialize)]
struct IngressControllerStatus {
    domain: Option<serde_json::Value>,
}

impl IngressDomainResolver {
    /// Create a resolver for the given API server and credential files.
    pub fn new(
        api_url: impl Into<String>,
        token_path: impl Into<PathBuf>,
        ca_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            token_path: token_path.into(),
            ca_path: ca_path.into(),
        }
    }

    /// Create a resolver from the in-cluster environment.
    pub fn in_cluster() -> RepoResult<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            RepoError::hostname("KUBERNETES_SERVICE_HOST is not set; not running in a cluster")
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").map_err(|_| {
            RepoError::hostname("KUBERNETES_SERVICE_PORT is not set; not running in a cluster")
        })?;

        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host
        };
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        Ok(Self::new(
            format!("https://{}:{}", host, port),
            dir.join("token"),
            dir.join("ca.crt"),
        ))
    }

    fn client(&self) -> RepoResult<reqwest::Client> {
        let ca = std::fs::read(&self.ca_path).map_err(|e| {
            RepoError::hostname(format!("unable to read {}: {}", self.ca_path.display(), e))
        })?;
        let certificate = reqwest::Certificate::from_pem(&ca).map_err(RepoError::hostname)?;
        reqwest::Client::builder()
            .add_root_certificate(certificate)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(RepoError::hostname)
    }
}

#[async_trait]
impl HostnameResolver for IngressDomainResolver {
    async fn resolve(&self) -> RepoResult<String> {
        let token = std::fs::read_to_string(&self.token_path).map_err(|e| {
            RepoError::hostname(format!("unable to read {}: {}", self.token_path.display(), e))
        })?;
        let url = format!("{}{}", self.api_url.trim_end_matches('/'), INGRESS_CONTROLLER_PATH);
        debug!("Querying default ingress controller at {}", url);

        let response = self
            .client()?
            .get(&url)
            .bearer_auth(token.trim())
            .send()
            .await
            .map_err(RepoError::hostname)?
            .error_for_status()
            .map_err(RepoError::hostname)?;
        let controller: IngressController =
            response.json().await.map_err(RepoError::hostname)?;

        let domain = domain_from_controller(controller)?;
        info!("Discovered ingress domain {}", domain);
        Ok(domain)
    }
}

fn domain_from_controller(controller: IngressController) -> RepoResult<String> {
    let status = controller
        .status
        .ok_or_else(|| RepoError::hostname("unexpected status of default ingresscontroller"))?;

    match status.domain {
        Some(serde_json::Value::String(domain)) => validate_hostname(&domain),
        _ => Err(RepoError::hostname(
            "domain doesn't exist in the status of default ingresscontroller",
        )),
    }
}

/// Check that a hostname can be embedded in a URL authority.
pub fn validate_hostname(host: &str) -> RepoResult<String> {
    let host = host.trim();
    if host.is_empty() {
        return Err(RepoError::hostname("hostname is empty"));
    }
    if host.contains('/') || host.chars().any(char::is_whitespace) {
        return Err(RepoError::hostname(format!("invalid hostname '{}'", host)));
    }
    Ok(host.to_string())
}
