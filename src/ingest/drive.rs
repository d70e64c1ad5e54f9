//! Remote drive listing and download
//!
//! [`DriveClient`] is the seam the ingestion pipeline talks to;
//! [`GoogleDriveClient`] implements it over the Drive v3 REST API.

use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::config::DriveConfig;
use crate::error::TransportError;

/// OAuth scope requested for service account tokens
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// A file entry from a folder listing
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveImageRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, rename = "parents")]
    pub parent_folder_ids: Vec<String>,
}

impl DriveImageRef {
    /// First parent folder, or empty when the listing omitted parents
    pub fn first_parent(&self) -> &str {
        self.parent_folder_ids.first().map(String::as_str).unwrap_or("")
    }
}

/// One page of a folder listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePage {
    #[serde(default)]
    pub files: Vec<DriveImageRef>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait DriveClient: Send + Sync + 'static {
    /// List one page of the direct children of `folder_id`
    async fn list_page(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FilePage, TransportError>;

    /// Download the raw bytes of a file
    async fn download(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;
}

enum Credentials {
    Anonymous,
    Static(String),
    ServiceAccount(CustomServiceAccount),
}

/// Drive v3 client
///
/// Listing includes shared-drive items. Requests carry a bearer token from,
/// in order: the configured static token, or a service account key (tokens
/// are cached and refreshed before expiry). Without either only publicly
/// shared folders are visible.
pub struct GoogleDriveClient {
    http: Client,
    api_base: String,
    download_base: String,
    credentials: Credentials,
    page_size: u32,
}

impl GoogleDriveClient {
    pub fn new(config: &DriveConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(concat!("drivefaces/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let credentials = match (&config.access_token, &config.service_account_file) {
            (Some(token), _) => Credentials::Static(token.clone()),
            (None, Some(path)) => {
                let account = CustomServiceAccount::from_file(path)?;
                info!("Authenticating to Drive with service account {}", path.display());
                Credentials::ServiceAccount(account)
            }
            (None, None) => Credentials::Anonymous,
        };

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            download_base: config.download_base.clone(),
            credentials,
            page_size: config.page_size,
        })
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        Ok(match &self.credentials {
            Credentials::Anonymous => request,
            Credentials::Static(token) => request.bearer_auth(token),
            Credentials::ServiceAccount(account) => {
                let token = account.token(&[DRIVE_READONLY_SCOPE]).await?;
                request.bearer_auth(token.as_str())
            }
        })
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransportError::Status {
            status,
            url: response.url().to_string(),
        })
    }
}

#[async_trait]
impl DriveClient for GoogleDriveClient {
    async fn list_page(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FilePage, TransportError> {
        let query = format!("'{}' in parents", folder_id);
        let page_size = self.page_size.to_string();
        let mut params = vec![
            ("q", query.as_str()),
            ("fields", "nextPageToken, files(id, name, mimeType, parents)"),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
            ("pageSize", page_size.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let request = self
            .http
            .get(format!("{}/files", self.api_base))
            .query(&params);
        let response = check_status(self.authorize(request).await?.send().await?)?;

        Ok(response.json::<FilePage>().await?)
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let request = self.http.get(&self.download_base).query(&[("id", file_id)]);
        let response = check_status(self.authorize(request).await?.send().await?)?;

        Ok(response.bytes().await?.to_vec())
    }
}
