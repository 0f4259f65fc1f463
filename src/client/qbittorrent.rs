use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{AcquisitionClient, ClientError, Placement};
use crate::config::QbittorrentConfig;
use crate::storage::CachedPayload;

/// qBittorrent Web API (v2) client.
///
/// Logs in lazily on the first submission when credentials are configured,
/// and once more if the session expires (HTTP 403).
pub struct QbittorrentClient {
    client: Client,
    base_url: Arc<str>,
    username: Option<String>,
    password: Option<SecretString>,
    session: RwLock<Option<Session>>,
}

/// A successful login. Servers that skip authentication (for example for
/// localhost clients) answer `Ok.` without handing out a cookie.
struct Session {
    sid: Option<String>,
}

impl QbittorrentClient {
    /// Create a client sharing an existing reqwest client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/');
        Self {
            client,
            base_url: Arc::from(base_url),
            username: None,
            password: None,
            session: RwLock::new(None),
        }
    }

    pub fn from_config(client: Client, config: &QbittorrentConfig) -> Self {
        let mut qb = Self::with_client(client, config.url.as_str());
        if let Some(username) = &config.username {
            qb = qb.with_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }
        qb
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2{}", self.base_url, path)
    }

    fn has_credentials(&self) -> bool {
        self.username.is_some()
    }

    /// Login to qBittorrent WebUI
    /// POST /api/v2/auth/login
    pub async fn login(&self) -> Result<(), ClientError> {
        let username = self.username.as_deref().unwrap_or_default();
        let password = self
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string())
            .unwrap_or_default();

        let url = self.url("/auth/login");
        let params = [("username", username), ("password", password.as_str())];
        let response = self.client.post(&url).form(&params).send().await?;

        let status = response.status();
        let sid = extract_sid(response.headers());
        let body = response.text().await.unwrap_or_default();

        if status.is_success() && body.trim() == "Ok." {
            *self.session.write().await = Some(Session { sid });
            tracing::debug!("Logged in to qBittorrent");
            Ok(())
        } else if body.trim() == "Fails." {
            Err(ClientError::Auth("Invalid username or password".into()))
        } else {
            Err(ClientError::Auth(format!(
                "Login failed: {} - {}",
                status.as_u16(),
                body
            )))
        }
    }

    /// Add a torrent file
    /// POST /api/v2/torrents/add
    async fn post_torrent(
        &self,
        bytes: &[u8],
        file_name: &str,
        placement: &Placement,
    ) -> Result<reqwest::Response, ClientError> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/x-bittorrent")?;

        let mut form = Form::new().part("torrents", part);
        if !placement.save_path.is_empty() {
            form = form.text("savepath", placement.save_path.clone());
        }
        if !placement.category.is_empty() {
            form = form.text("category", placement.category.clone());
        }
        if !placement.tags.is_empty() {
            form = form.text("tags", placement.tags.clone());
        }

        let mut request = self.client.post(self.url("/torrents/add")).multipart(form);
        if let Some(sid) = self
            .session
            .read()
            .await
            .as_ref()
            .and_then(|s| s.sid.as_deref())
        {
            request = request.header(COOKIE, format!("SID={sid}"));
        }

        Ok(request.send().await?)
    }
}

#[async_trait]
impl AcquisitionClient for QbittorrentClient {
    fn client_type(&self) -> &'static str {
        "qbittorrent"
    }

    fn supports_placement_submission(&self) -> bool {
        true
    }

    async fn add_payload(
        &self,
        payload: &CachedPayload,
        placement: &Placement,
    ) -> Result<(), ClientError> {
        let bytes = tokio::fs::read(&payload.path).await?;
        let file_name = payload.file_name();

        if self.has_credentials() && self.session.read().await.is_none() {
            self.login().await?;
        }

        let mut response = self.post_torrent(&bytes, &file_name, placement).await?;

        // Session expired: log in again and retry once
        if response.status() == StatusCode::FORBIDDEN && self.has_credentials() {
            tracing::debug!("qBittorrent session rejected, logging in again");
            self.login().await?;
            response = self.post_torrent(&bytes, &file_name, placement).await?;
        }

        let status = response.status();
        if status == StatusCode::UNSUPPORTED_MEDIA_TYPE {
            return Err(ClientError::Rejected("Invalid torrent file".into()));
        }

        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ClientError::Api {
                status_code: status.as_u16(),
                message: body,
            });
        }
        if body.trim() == "Fails." {
            return Err(ClientError::Rejected(
                "qBittorrent refused the torrent".into(),
            ));
        }

        Ok(())
    }
}

fn extract_sid(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("SID="))
        .map(str::to_string)
}
