//! Client configuration types and the factory which turns them into live clients.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::aws::AwsClient;
use crate::azure::AzureClient;
use crate::client::ObjectClient;
use crate::error::{Error, Result};
use crate::gcp::GcpClient;
use crate::memory::MemoryClient;
use crate::values::Provider;

/// Client configuration using a tagged enum for type-safe configuration.
///
/// Supports the three cloud providers plus an in-memory client for testing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum ClientConfig {
    /// AWS S3 or S3-compatible storage (MinIO, Ceph RGW, etc.)
    #[serde(rename = "aws")]
    Aws {
        /// AWS region (e.g., "us-east-1")
        #[serde(default)]
        region: Option<String>,
        /// Custom endpoint URL (for S3-compatible services like MinIO)
        #[serde(default)]
        endpoint: Option<String>,
        /// Access key ID (falls back to the default AWS credential chain)
        #[serde(default)]
        access_key: Option<String>,
        /// Secret access key (falls back to the default AWS credential chain)
        #[serde(default)]
        secret_key: Option<String>,
        /// Use path-style requests (required for MinIO/Ceph RGW)
        #[serde(default)]
        path_style: bool,
    },

    /// Azure Blob Storage
    #[serde(rename = "azure")]
    Azure {
        /// Azure storage account name
        account_name: String,
        /// Storage account key (if None, anonymous access is used)
        #[serde(default)]
        account_key: Option<String>,
    },

    /// Google Cloud Storage
    #[serde(rename = "gcp")]
    Gcp {
        /// Path to a service account JSON key file (if None, uses Application Default
        /// Credentials)
        #[serde(default)]
        service_account_path: Option<String>,
    },

    /// In-memory client (for testing)
    #[serde(rename = "memory")]
    Memory,
}

impl ClientConfig {
    /// Parse configuration from a URL string.
    ///
    /// Supported URL formats:
    /// - `s3://?region=us-east-1&endpoint=http://localhost:9000`
    /// - `az://account-name`
    /// - `gs://`
    /// - `memory://`
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|err| Error::Config(format!("invalid storage URL: {err}")))?;

        let query = |key: &str| {
            parsed.query_pairs().find(|(k, _)| k == key).map(|(_, value)| value.to_string())
        };

        match parsed.scheme() {
            "s3" => Ok(Self::Aws {
                region: query("region"),
                endpoint: query("endpoint"),
                access_key: std::env::var("AWS_ACCESS_KEY_ID").ok(),
                secret_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
                path_style: query("path_style").as_deref() == Some("true"),
            }),
            "az" => Ok(Self::Azure {
                account_name: parsed.host_str().unwrap_or_default().to_string(),
                account_key: std::env::var("AZURE_STORAGE_KEY").ok(),
            }),
            "gs" => Ok(Self::Gcp {
                service_account_path: std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok(),
            }),
            "memory" => Ok(Self::Memory),
            scheme => Err(Error::Config(format!("unknown storage scheme: {scheme}"))),
        }
    }
}

/// Creates a client from the given configuration.
pub async fn create_client(config: &ClientConfig) -> Result<Arc<dyn ObjectClient>> {
    match config {
        ClientConfig::Aws { region, endpoint, access_key, secret_key, path_style } => {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

            if let Some(region) = region {
                loader = loader.region(aws_config::Region::new(region.clone()));
            }

            if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
                loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                    access_key, secret_key, None, None, "objclient",
                ));
            }

            let base = loader.load().await;

            let mut builder =
                aws_sdk_s3::config::Builder::from(&base).force_path_style(*path_style);

            if let Some(endpoint) = endpoint {
                builder = builder.endpoint_url(endpoint);
            }

            let client = aws_sdk_s3::Client::from_conf(builder.build());

            Ok(Arc::new(AwsClient::new(client)))
        }

        ClientConfig::Azure { account_name, account_key } => {
            let credentials = match account_key {
                Some(key) => azure_storage::StorageCredentials::access_key(
                    account_name.clone(),
                    key.clone(),
                ),
                None => azure_storage::StorageCredentials::anonymous(),
            };

            let service =
                azure_storage_blobs::prelude::ClientBuilder::new(account_name.clone(), credentials)
                    .blob_service_client();

            Ok(Arc::new(AzureClient::new(service)))
        }

        ClientConfig::Gcp { service_account_path } => {
            use google_cloud_storage::client::google_cloud_auth::credentials::CredentialsFile;
            use google_cloud_storage::client::{Client, ClientConfig};

            let provider_err = |err: google_cloud_storage::client::google_cloud_auth::error::Error| {
                Error::Provider { provider: Provider::Gcp, source: Box::new(err) }
            };

            let config = match service_account_path {
                Some(path) => {
                    let credentials =
                        CredentialsFile::new_from_file(path.clone()).await.map_err(provider_err)?;

                    ClientConfig::default().with_credentials(credentials).await.map_err(provider_err)?
                }
                None => ClientConfig::default().with_auth().await.map_err(provider_err)?,
            };

            Ok(Arc::new(GcpClient::new(Client::new(config))))
        }

        ClientConfig::Memory => Ok(Arc::new(MemoryClient::new(Provider::Aws))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aws_url_parsing() {
        let config = ClientConfig::from_url("s3://?region=us-west-2&path_style=true").unwrap();
        match config {
            ClientConfig::Aws { region, path_style, .. } => {
                assert_eq!(region, Some("us-west-2".to_string()));
                assert!(path_style);
            }
            _ => panic!("expected AWS config"),
        }
    }

    #[test]
    fn azure_url_parsing() {
        let config = ClientConfig::from_url("az://myaccount").unwrap();
        match config {
            ClientConfig::Azure { account_name, .. } => {
                assert_eq!(account_name, "myaccount");
            }
            _ => panic!("expected Azure config"),
        }
    }

    #[test]
    fn memory_url_parsing() {
        let config = ClientConfig::from_url("memory://").unwrap();
        assert!(matches!(config, ClientConfig::Memory));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = ClientConfig::from_url("ftp://host").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn yaml_deserialization_aws() {
        let yaml = r#"
provider: aws
region: us-east-1
endpoint: http://localhost:9000
path_style: true
"#;
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        match config {
            ClientConfig::Aws { region, endpoint, path_style, .. } => {
                assert_eq!(region, Some("us-east-1".to_string()));
                assert_eq!(endpoint, Some("http://localhost:9000".to_string()));
                assert!(path_style);
            }
            _ => panic!("expected AWS config"),
        }
    }

    #[test]
    fn yaml_deserialization_azure() {
        let yaml = r#"
provider: azure
account_name: mystorageaccount
"#;
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        match config {
            ClientConfig::Azure { account_name, account_key } => {
                assert_eq!(account_name, "mystorageaccount");
                assert_eq!(account_key, None);
            }
            _ => panic!("expected Azure config"),
        }
    }

    #[test]
    fn yaml_deserialization_gcp() {
        let yaml = r#"
provider: gcp
"#;
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config, ClientConfig::Gcp { service_account_path: None }));
    }
}
