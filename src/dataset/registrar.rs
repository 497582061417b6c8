//! Derived-dataset registrars.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Dataset, RegistrationRequest};
use crate::context::Credential;
use crate::engine::EngineConfig;
use crate::error::RegistrationError;

/// Creates derived datasets.
#[async_trait]
pub trait DatasetRegistrar: Send + Sync {
    async fn register(
        &self,
        request: &RegistrationRequest,
        credential: &Credential,
    ) -> Result<Dataset, RegistrationError>;
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    derived_dataset_uuid: String,
    full_path: PathBuf,
}

/// Registers datasets through the ingest API.
#[derive(Debug, Clone)]
pub struct HttpRegistrar {
    client: Client,
    url: String,
}

impl HttpRegistrar {
    pub fn new(config: &EngineConfig) -> Result<Self, RegistrationError> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self {
            client,
            url: config.api_url(&config.derived_dataset_endpoint),
        })
    }
}

#[async_trait]
impl DatasetRegistrar for HttpRegistrar {
    async fn register(
        &self,
        request: &RegistrationRequest,
        credential: &Credential,
    ) -> Result<Dataset, RegistrationError> {
        debug!(
            url = %self.url,
            name = %request.derived_dataset_name,
            authorization = %format!("Bearer {}", credential),
            "Registering derived dataset"
        );

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", credential.expose()))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(RegistrationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let parsed: RegistrationResponse = serde_json::from_str(&text)
            .map_err(|e| RegistrationError::InvalidResponse(format!("{}: {}", e, text)))?;

        info!(
            uuid = %parsed.derived_dataset_uuid,
            path = %parsed.full_path.display(),
            "Derived dataset registered"
        );
        Ok(Dataset::new(parsed.derived_dataset_uuid, parsed.full_path))
    }
}

/// Allocates derived datasets as local directories, for dry runs.
///
/// The uuid is derived from the dataset name, so repeated registrations of the
/// same name map to the same directory.
#[derive(Debug, Clone)]
pub struct LocalRegistrar {
    root: PathBuf,
}

impl LocalRegistrar {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DatasetRegistrar for LocalRegistrar {
    async fn register(
        &self,
        request: &RegistrationRequest,
        _credential: &Credential,
    ) -> Result<Dataset, RegistrationError> {
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, request.derived_dataset_name.as_bytes())
            .simple()
            .to_string();
        let path = self.root.join(&uuid);
        tokio::fs::create_dir_all(&path).await?;

        info!(uuid = %uuid, path = %path.display(), "Derived dataset allocated locally");
        Ok(Dataset::new(uuid, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;
    use tempfile::TempDir;

    fn request() -> RegistrationRequest {
        RegistrationRequest {
            source_dataset_uuid: "abc123".to_string(),
            derived_dataset_name: "devtest_step2__abc123__devtest-step2-pipeline".to_string(),
            derived_dataset_types: vec!["devtest".to_string()],
        }
    }

    #[tokio::test]
    async fn test_http_registrar_posts_request() {
        let (url, server) = serve_once(
            200,
            r#"{"derived_dataset_uuid": "d-1", "full_path": "/data/d-1"}"#,
        )
        .await;
        let config = EngineConfig::default().with_ingest_api_url(url);
        let registrar = HttpRegistrar::new(&config).unwrap();

        let dataset = registrar
            .register(&request(), &Credential::new("secret-token-value"))
            .await
            .unwrap();

        assert_eq!(dataset, Dataset::new("d-1", "/data/d-1"));
        let captured = server.await.unwrap();
        assert!(captured.head.starts_with("post /datasets/derived "));
        assert!(captured.head.contains("authorization: bearer secret-token-value"));
        assert_eq!(captured.json()["derived_dataset_types"][0], "devtest");
        assert_eq!(captured.json()["source_dataset_uuid"], "abc123");
    }

    #[tokio::test]
    async fn test_http_registrar_rejection() {
        let (url, server) = serve_once(401, r#"{"error": "unauthorized"}"#).await;
        let config = EngineConfig::default().with_ingest_api_url(url);
        let registrar = HttpRegistrar::new(&config).unwrap();

        let err = registrar
            .register(&request(), &Credential::new("bad"))
            .await
            .unwrap_err();

        assert!(matches!(err, RegistrationError::Rejected { status: 401, .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_local_registrar_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let registrar = LocalRegistrar::new(temp.path());
        let credential = Credential::new("tok");

        let first = registrar.register(&request(), &credential).await.unwrap();
        let second = registrar.register(&request(), &credential).await.unwrap();

        assert_eq!(first, second);
        assert!(first.path.is_dir());
        assert!(first.path.starts_with(temp.path()));
    }
}
