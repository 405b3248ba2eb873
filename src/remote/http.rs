use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

use super::types::{ApiEnvelope, Article, ArticleId, FeedKind, FilterKey, Page, RemoteError};
use super::RemoteDataSource;
use crate::storage::{CommentId, CommentRecord};

const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// [`RemoteDataSource`] backed by the blog's JSON REST API.
///
/// All endpoints hang off `base_url` (e.g. `http://localhost:4000/api`).
/// The bearer token is attached per call, never stored here.
#[derive(Clone)]
pub struct HttpDataSource {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
}

impl std::fmt::Debug for HttpDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDataSource")
            .field("base", &self.base.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn is_local_host(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"))
}

impl HttpDataSource {
    /// Build a data source for `base_url`.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::InvalidUrl`] if the URL does not parse or cannot be a base
    /// - [`RemoteError::InsecureBaseUrl`] for plain HTTP to anything but localhost,
    ///   since bearer tokens travel in headers
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, RemoteError> {
        let base =
            Url::parse(base_url).map_err(|e| RemoteError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::InvalidUrl(base_url.to_string()));
        }

        match base.scheme() {
            "https" => {}
            "http" if is_local_host(&base) => {
                tracing::warn!(base_url = %base, "Using non-HTTPS API base URL (localhost only)");
            }
            "http" => {
                tracing::error!(base_url = %base, "Rejecting non-HTTPS base URL (HTTPS required except for localhost)");
                return Err(RemoteError::InsecureBaseUrl);
            }
            _ => return Err(RemoteError::InvalidUrl(base_url.to_string())),
        }

        Ok(Self {
            client,
            base,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        auth_token: Option<&SecretString>,
    ) -> reqwest::RequestBuilder {
        match auth_token {
            Some(token) => {
                tracing::trace!("API authentication configured");
                request.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()))
            }
            None => request,
        }
    }

    /// Send, map status codes, and decode the common envelope.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<ApiEnvelope, RemoteError> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| RemoteError::Timeout(self.timeout.as_secs()))?
            .map_err(RemoteError::Network)?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(RemoteError::Unauthenticated)
            }
            StatusCode::NOT_FOUND => return Err(RemoteError::NotFound),
            s if s.is_client_error() => {
                // 400s carry a human-readable message in the envelope
                let bytes = read_limited(response, MAX_RESPONSE_SIZE).await?;
                return match serde_json::from_slice::<ApiEnvelope>(&bytes) {
                    Ok(ApiEnvelope {
                        message: Some(message),
                        ..
                    }) => Err(RemoteError::Rejected(message)),
                    _ => Err(RemoteError::HttpStatus(s.as_u16())),
                };
            }
            s if !s.is_success() => return Err(RemoteError::HttpStatus(s.as_u16())),
            _ => {}
        }

        let bytes = read_limited(response, MAX_RESPONSE_SIZE).await?;
        let envelope: ApiEnvelope =
            serde_json::from_slice(&bytes).map_err(|e| RemoteError::Parse(e.to_string()))?;

        if !envelope.success {
            return Err(RemoteError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        Ok(envelope)
    }
}

impl RemoteDataSource for HttpDataSource {
    async fn list_articles(
        &self,
        filter: &FilterKey,
        limit: usize,
        offset: usize,
    ) -> Result<Page, RemoteError> {
        let mut url = match filter.kind() {
            FeedKind::Search => self.endpoint(&["articles", "search"])?,
            FeedKind::Home | FeedKind::Category => self.endpoint(&["articles"])?,
        };
        {
            let mut query = url.query_pairs_mut();
            if let Some(term) = filter.search_term() {
                query.append_pair("keyword", term);
            } else if let Some(category) = filter.category_name() {
                query.append_pair("category", category);
            }
            query
                .append_pair("limit", &limit.to_string())
                .append_pair("offset", &offset.to_string());
        }

        tracing::debug!(url = %url, "Listing articles");
        let envelope = self.execute(self.client.get(url)).await?;

        let page = Page::new(
            envelope
                .list
                .into_iter()
                .map(|a| a.into_summary())
                .collect(),
            envelope.has_more,
        );
        // The server does not filter on `category`, so re-check every row
        match filter.kind() {
            FeedKind::Category => {
                let wanted = filter.category_name();
                let page = page.retain(|a| a.category.as_deref() == wanted);
                tracing::debug!(
                    fetched = page.fetched,
                    kept = page.len(),
                    "Filtered category page"
                );
                Ok(page)
            }
            FeedKind::Home | FeedKind::Search => Ok(page),
        }
    }

    async fn get_article(&self, article_id: ArticleId) -> Result<Article, RemoteError> {
        let url = self.endpoint(&["articles", &article_id.to_string()])?;
        let envelope = self.execute(self.client.get(url)).await?;
        envelope
            .article
            .map(|a| a.into_article())
            .ok_or(RemoteError::NotFound)
    }

    async fn get_article_comments(
        &self,
        article_id: ArticleId,
    ) -> Result<Vec<CommentRecord>, RemoteError> {
        let url = self.endpoint(&["articles", &article_id.to_string(), "comments"])?;
        let envelope = self.execute(self.client.get(url)).await?;
        Ok(envelope
            .comments
            .into_iter()
            .map(|c| c.into_record())
            .collect())
    }

    async fn create_comment(
        &self,
        article_id: ArticleId,
        body: &str,
        auth_token: Option<&SecretString>,
    ) -> Result<CommentRecord, RemoteError> {
        let url = self.endpoint(&["articles", &article_id.to_string(), "comments"])?;
        let payload = serde_json::json!({ "commentContent": body });
        let bytes = serde_json::to_vec(&payload).map_err(|e| RemoteError::Parse(e.to_string()))?;

        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(bytes);
        let envelope = self.execute(self.authorize(request, auth_token)).await?;

        envelope
            .comment
            .map(|c| c.into_record())
            .ok_or_else(|| RemoteError::Parse("response missing `comment`".to_string()))
    }

    async fn like_comment(
        &self,
        comment_id: &CommentId,
        auth_token: Option<&SecretString>,
    ) -> Result<(), RemoteError> {
        // Provisional ids were never seen by the server
        let Some(server_id) = comment_id.server_id() else {
            return Err(RemoteError::NotFound);
        };
        let url = self.endpoint(&["comments", &server_id.to_string(), "like"])?;
        let request = self.authorize(self.client.post(url), auth_token);
        self.execute(request).await.map(|_| ())
    }
}

async fn read_limited(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, RemoteError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(RemoteError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(RemoteError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(RemoteError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
