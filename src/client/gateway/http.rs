/**
 * HTTP Document Store
 *
 * REST client for a remote document service:
 *
 *   GET    {base}/users/{uid}/{collection}?limit=n   list, newest first
 *   GET    {base}/users/{uid}/{collection}/{id}      fetch
 *   PUT    {base}/users/{uid}/{collection}/{id}      create or replace
 *   PATCH  {base}/users/{uid}/{collection}/{id}      shallow merge
 *   DELETE {base}/users/{uid}/{collection}/{id}      remove
 *   GET    {base}/ping                               reachability
 *
 * Path segments are percent-encoded and every request is bounded by the
 * configured timeout.
 *
 * Subscriptions poll the list endpoint and forward a snapshot only when the
 * collection changed since the previous poll.
 */
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{DocumentStore, Subscription};
use crate::shared::error::{Result, SyncError};
use crate::shared::event::{CollectionSnapshot, RemoteDocument};
use crate::shared::model::Collection;

/// [`DocumentStore`] backed by a REST service
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
    poll_interval: Duration,
}

impl HttpDocumentStore {
    /// Every request is bounded by `request_timeout`
    pub fn new(base_url: &str, poll_interval: Duration, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::validation("server_url", format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::validation("server_url", format!("{} cannot hold a path", base_url)));
        }
        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token: None,
            poll_interval,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Base URL with `segments` appended, each one percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::validation("server_url", format!("{} cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn collection_url(&self, user_id: &str, collection: Collection) -> Result<Url> {
        self.endpoint(&["users", user_id, collection.as_str()])
    }

    fn document_url(&self, user_id: &str, collection: Collection, id: &str) -> Result<Url> {
        self.endpoint(&["users", user_id, collection.as_str(), id])
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, collection: Collection, id: &str) -> Result<Response> {
        let response = self.authorize(request).send().await?;
        check_status(response, collection, id).await
    }

    async fn fetch_list(&self, user_id: &str, collection: Collection, limit: Option<usize>) -> Result<Vec<RemoteDocument>> {
        let mut url = self.collection_url(user_id, collection)?;
        if let Some(limit) = limit {
            url.query_pairs_mut().append_pair("limit", &limit.to_string());
        }
        let request = self.client.get(url);
        let response = self.send(request, collection, "").await?;
        Ok(response.json().await?)
    }
}

async fn check_status(response: Response, collection: Collection, id: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_else(|_| status.to_string());
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::permission(body),
        StatusCode::NOT_FOUND => SyncError::not_found(collection.as_str(), id),
        _ => SyncError::network(format!("{} - {}", status, body)),
    })
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get(&self, user_id: &str, collection: Collection, id: &str) -> Result<Option<RemoteDocument>> {
        let request = self.client.get(self.document_url(user_id, collection, id)?);
        match self.send(request, collection, id).await {
            Ok(response) => Ok(Some(response.json().await?)),
            Err(SyncError::NotFoundError { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn upsert(&self, user_id: &str, collection: Collection, id: &str, data: Value) -> Result<()> {
        let request = self.client.put(self.document_url(user_id, collection, id)?).json(&data);
        self.send(request, collection, id).await?;
        Ok(())
    }

    async fn update(&self, user_id: &str, collection: Collection, id: &str, patch: Value) -> Result<()> {
        let request = self.client.patch(self.document_url(user_id, collection, id)?).json(&patch);
        self.send(request, collection, id).await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str, collection: Collection, id: &str) -> Result<()> {
        let request = self.client.delete(self.document_url(user_id, collection, id)?);
        match self.send(request, collection, id).await {
            Ok(_) | Err(SyncError::NotFoundError { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, user_id: &str, collection: Collection, limit: Option<usize>) -> Result<Vec<RemoteDocument>> {
        self.fetch_list(user_id, collection, limit).await
    }

    async fn subscribe(
        &self,
        user_id: &str,
        collection: Collection,
        sink: mpsc::UnboundedSender<CollectionSnapshot>,
    ) -> Result<Subscription> {
        // the first fetch surfaces configuration and permission errors to the caller
        let initial = self.fetch_list(user_id, collection, None).await?;
        let store = self.clone();
        let user_id = user_id.to_string();

        let task = tokio::spawn(async move {
            let mut last = initial.clone();
            let first = CollectionSnapshot {
                user_id: user_id.clone(),
                collection,
                documents: initial,
            };
            if sink.send(first).is_err() {
                return;
            }

            let mut interval = tokio::time::interval(store.poll_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                match store.fetch_list(&user_id, collection, None).await {
                    Ok(documents) if documents != last => {
                        last = documents.clone();
                        let snapshot = CollectionSnapshot {
                            user_id: user_id.clone(),
                            collection,
                            documents,
                        };
                        if sink.send(snapshot).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("[Gateway] Poll of {} failed: {}", collection, e),
                }
            }
        });

        Ok(Subscription::new(collection, task))
    }

    async fn probe(&self) -> Result<()> {
        let request = self.client.get(self.endpoint(&["ping"])?);
        let response = self.authorize(request).send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::permission("probe rejected")),
            status if status.is_success() => Ok(()),
            status => Err(SyncError::network(format!("probe returned {}", status))),
        }
    }
}
