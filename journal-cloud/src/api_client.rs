//! PostgREST client for the remote journal and settings tables.
//!
//! Every request carries the project `apikey` header and a bearer token:
//! the signed-in user's access token when one is set, the api key otherwise.
//! Row filters use PostgREST operators (`user_id=eq.<id>`).

use crate::config::RemoteConfig;
use crate::error::{CloudError, CloudResult};
use crate::remote::RemoteStore;
use crate::types::{RemoteJournal, RemoteJournalWrite, RemoteSettings};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

const JOURNALS: &str = "journals";
const SETTINGS: &str = "settings";

/// [`RemoteStore`] over HTTP.
#[derive(Clone)]
pub struct RestRemoteStore {
    client: Client,
    config: RemoteConfig,
    access_token: Arc<RwLock<Option<String>>>,
}

impl RestRemoteStore {
    pub fn new(config: RemoteConfig) -> CloudResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(CloudError::Config("remote base_url is empty".into()));
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            config,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Sets or clears the user's access token.
    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = token;
    }

    pub async fn has_access_token(&self) -> bool {
        self.access_token.read().await.is_some()
    }

    fn url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{table}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let token = self
            .access_token
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.config.api_key.clone());
        self.client
            .request(method, self.url(table))
            .header("apikey", &self.config.api_key)
            .bearer_auth(token)
    }

    /// Sends a write asking PostgREST to echo the affected rows back.
    async fn write<T: DeserializeOwned>(
        &self,
        method: Method,
        table: &str,
        query: &[(&str, String)],
        body: &impl serde::Serialize,
    ) -> CloudResult<Vec<T>> {
        debug!("{method} /rest/v1/{table}");
        let resp = self
            .request(method, table)
            .await
            .query(query)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }
}

/// Maps auth failures to [`CloudError::AuthRequired`] and any other
/// non-success status to [`CloudError::Api`].
async fn check(resp: Response) -> CloudResult<Response> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(CloudError::AuthRequired);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(CloudError::Api(format!("{status}: {body}")));
    }
    Ok(resp)
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn list_journals(&self, user_id: &str) -> CloudResult<Vec<RemoteJournal>> {
        let resp = self
            .request(Method::GET, JOURNALS)
            .await
            .query(&[("user_id", eq(user_id)), ("order", "updated_at.desc".into())])
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn create_journal(&self, write: &RemoteJournalWrite) -> CloudResult<RemoteJournal> {
        let rows: Vec<RemoteJournal> = self.write(Method::POST, JOURNALS, &[], write).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| CloudError::Api("insert returned no row".into()))
    }

    async fn update_journal(
        &self,
        remote_id: &str,
        write: &RemoteJournalWrite,
    ) -> CloudResult<RemoteJournal> {
        let query = [("id", eq(remote_id)), ("user_id", eq(&write.user_id))];
        let rows: Vec<RemoteJournal> = self.write(Method::PATCH, JOURNALS, &query, write).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| CloudError::NotFound(format!("journal {remote_id}")))
    }

    async fn get_settings(&self, user_id: &str) -> CloudResult<Option<RemoteSettings>> {
        let resp = self
            .request(Method::GET, SETTINGS)
            .await
            .query(&[("user_id", eq(user_id))])
            .send()
            .await?;
        let rows: Vec<RemoteSettings> = check(resp).await?.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn create_settings(&self, settings: &RemoteSettings) -> CloudResult<RemoteSettings> {
        let rows: Vec<RemoteSettings> = self.write(Method::POST, SETTINGS, &[], settings).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| CloudError::Api("insert returned no row".into()))
    }

    async fn update_settings(&self, settings: &RemoteSettings) -> CloudResult<RemoteSettings> {
        let query = [("user_id", eq(&settings.user_id))];
        let rows: Vec<RemoteSettings> =
            self.write(Method::PATCH, SETTINGS, &query, settings).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| CloudError::NotFound(format!("settings for {}", settings.user_id)))
    }
}
