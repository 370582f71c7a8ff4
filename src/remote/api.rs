//! HTTP implementation of the remote capability trait.
//!
//! Talks a Confluence-style REST surface with basic auth. Every response is
//! mapped to a typed `RemoteError`; the engine never sees a status code.

use crate::content::ContentConverter;
use crate::domain::{PageId, RemotePage};
use crate::error::RemoteError;
use crate::remote::{PageOperations, RemoteTreeNode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Page size for child listings while walking the hierarchy.
const CHILD_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

impl Credentials {
    /// Read credentials from the environment (a `.env` file has already been
    /// folded in by the entry point).
    pub fn from_env() -> Result<Self, RemoteError> {
        let user = std::env::var("WIKI_USER")
            .map_err(|_| RemoteError::AuthFailed("WIKI_USER is not set".into()))?;
        let token = std::env::var("WIKI_API_TOKEN")
            .map_err(|_| RemoteError::AuthFailed("WIKI_API_TOKEN is not set".into()))?;
        Ok(Self { user, token })
    }
}

pub struct RemoteClient {
    http: Client,
    base_url: String,
    space_key: String,
    /// Target for reparent-to-space-root requests.
    root_page_id: PageId,
    credentials: Credentials,
    converter: Arc<dyn ContentConverter>,
}

#[derive(Debug, Deserialize)]
struct PageDto {
    id: String,
    title: String,
    version: VersionDto,
    #[serde(default)]
    body: Option<BodyDto>,
    #[serde(default)]
    space: Option<SpaceDto>,
    #[serde(default)]
    ancestors: Vec<AncestorDto>,
}

#[derive(Debug, Deserialize)]
struct VersionDto {
    number: i64,
    #[serde(default)]
    when: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct BodyDto {
    storage: StorageDto,
}

#[derive(Debug, Deserialize)]
struct StorageDto {
    value: String,
}

#[derive(Debug, Deserialize)]
struct SpaceDto {
    key: String,
}

#[derive(Debug, Deserialize)]
struct AncestorDto {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChildListDto {
    results: Vec<PageDto>,
    #[serde(default)]
    size: usize,
}

impl RemoteClient {
    pub fn new(
        base_url: &str,
        space_key: &str,
        root_page_id: PageId,
        credentials: Credentials,
        converter: Arc<dyn ContentConverter>,
    ) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Protocol(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            space_key: space_key.to_string(),
            root_page_id,
            credentials,
            converter,
        })
    }

    fn content_url(&self, tail: &str) -> String {
        format!("{}/rest/api/content{tail}", self.base_url)
    }

    fn map_transport(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() || err.is_connect() {
            RemoteError::Unreachable(err.to_string())
        } else {
            RemoteError::Protocol(err.to_string())
        }
    }

    fn map_status(&self, id: &PageId, status: StatusCode, body: &str) -> RemoteError {
        match status {
            StatusCode::UNAUTHORIZED => RemoteError::AuthFailed(format!("HTTP 401: {body}")),
            StatusCode::FORBIDDEN => RemoteError::AccessDenied(format!("HTTP 403: {body}")),
            StatusCode::NOT_FOUND => RemoteError::NotFound(id.clone()),
            StatusCode::CONFLICT => RemoteError::VersionConflict {
                page_id: id.clone(),
                expected: -1,
            },
            s if s.is_server_error() => {
                RemoteError::Unreachable(format!("HTTP {s}: {body}"))
            }
            s => RemoteError::Protocol(format!("HTTP {s}: {body}")),
        }
    }

    async fn fetch_page_dto(&self, id: &PageId, expand: &str) -> Result<PageDto, RemoteError> {
        let url = self.content_url(&format!("/{id}"));
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.token))
            .query(&[("expand", expand)])
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_transport(e))?;
        if !status.is_success() {
            return Err(self.map_status(id, status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| RemoteError::Protocol(format!("malformed page response for {id}: {e}")))
    }

    fn snapshot_from(&self, dto: PageDto) -> Result<RemotePage, RemoteError> {
        let storage = dto.body.map(|b| b.storage.value).unwrap_or_default();
        let body = self
            .converter
            .storage_to_markdown(&storage)
            .map_err(|e| RemoteError::Protocol(format!("conversion failed: {e}")))?;

        Ok(RemotePage {
            id: PageId::new(dto.id),
            title: dto.title,
            parent_id: dto.ancestors.last().map(|a| PageId::new(a.id.clone())),
            storage,
            body,
            version: dto.version.number,
            modified: dto.version.when.unwrap_or_else(Utc::now),
            space_key: dto
                .space
                .map(|s| s.key)
                .unwrap_or_else(|| self.space_key.clone()),
        })
    }

    async fn fetch_children(&self, id: &PageId) -> Result<Vec<PageDto>, RemoteError> {
        let mut results = Vec::new();
        let mut start = 0usize;

        loop {
            let url = self.content_url(&format!("/{id}/child/page"));
            let response = self
                .http
                .get(&url)
                .basic_auth(&self.credentials.user, Some(&self.credentials.token))
                .query(&[
                    ("expand", "version"),
                    ("limit", &CHILD_PAGE_LIMIT.to_string()),
                    ("start", &start.to_string()),
                ])
                .send()
                .await
                .map_err(|e| self.map_transport(e))?;

            let status = response.status();
            let text = response.text().await.map_err(|e| self.map_transport(e))?;
            if !status.is_success() {
                return Err(self.map_status(id, status, &text));
            }
            let page: ChildListDto = serde_json::from_str(&text).map_err(|e| {
                RemoteError::Protocol(format!("malformed child listing for {id}: {e}"))
            })?;

            let batch = page.results.len();
            results.extend(page.results);
            if batch < CHILD_PAGE_LIMIT || page.size < CHILD_PAGE_LIMIT {
                break;
            }
            start += batch;
        }

        Ok(results)
    }
}

#[async_trait]
impl PageOperations for RemoteClient {
    async fn get_page(&self, id: &PageId) -> Result<RemotePage, RemoteError> {
        let dto = self
            .fetch_page_dto(id, "body.storage,version,space,ancestors")
            .await?;
        self.snapshot_from(dto)
    }

    async fn update_page(
        &self,
        id: &PageId,
        title: &str,
        storage: &str,
        version: i64,
    ) -> Result<RemotePage, RemoteError> {
        let url = self.content_url(&format!("/{id}"));
        let payload = json!({
            "id": id.as_str(),
            "type": "page",
            "title": title,
            "space": { "key": self.space_key },
            "body": { "storage": { "value": storage, "representation": "storage" } },
            "version": { "number": version + 1 },
        });

        let response = self
            .http
            .put(&url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.token))
            .json(&payload)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.map_transport(e))?;
        if status == StatusCode::CONFLICT {
            return Err(RemoteError::VersionConflict {
                page_id: id.clone(),
                expected: version,
            });
        }
        if !status.is_success() {
            return Err(self.map_status(id, status, &text));
        }

        let dto: PageDto = serde_json::from_str(&text)
            .map_err(|e| RemoteError::Protocol(format!("malformed update response for {id}: {e}")))?;
        self.snapshot_from(dto)
    }

    async fn reparent(&self, id: &PageId, new_parent: Option<&PageId>) -> Result<(), RemoteError> {
        let target = new_parent.unwrap_or(&self.root_page_id);
        let url = self.content_url(&format!("/{id}/move/append/{target}"));

        let response = self
            .http
            .put(&url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.token))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.map_status(id, status, &text));
        }
        Ok(())
    }

    async fn delete(&self, id: &PageId) -> Result<(), RemoteError> {
        let url = self.content_url(&format!("/{id}"));
        let response = self
            .http
            .delete(&url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.token))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::NO_CONTENT {
            let text = response.text().await.unwrap_or_default();
            return Err(self.map_status(id, status, &text));
        }
        Ok(())
    }

    async fn list_descendants(
        &self,
        root: &PageId,
        _space_key: &str,
        limit: usize,
        exclusions: &HashSet<PageId>,
    ) -> Result<RemoteTreeNode, RemoteError> {
        let root_dto = self.fetch_page_dto(root, "version").await?;
        let mut root_node = RemoteTreeNode {
            id: PageId::new(root_dto.id),
            title: root_dto.title,
            parent_id: None,
            version: root_dto.version.number,
            modified: root_dto.version.when.unwrap_or_else(Utc::now),
            children: Vec::new(),
        };

        let mut visited = 1usize;
        // Depth-first over a work list of (parent path into the tree). An
        // index path avoids fighting the borrow checker over nested &mut.
        let mut work: Vec<Vec<usize>> = vec![Vec::new()];

        while let Some(path) = work.pop() {
            if visited >= limit {
                tracing::warn!(limit, "page limit reached, truncating hierarchy walk");
                break;
            }

            let parent_id = node_at(&root_node, &path).id.clone();
            let children = self.fetch_children(&parent_id).await?;

            for dto in children {
                if visited >= limit {
                    break;
                }
                let child_id = PageId::new(dto.id.clone());
                if exclusions.contains(&child_id) {
                    tracing::debug!(page_id = %child_id, "excluded page skipped along with its subtree");
                    continue;
                }
                visited += 1;

                let node = RemoteTreeNode {
                    id: child_id,
                    title: dto.title,
                    parent_id: Some(parent_id.clone()),
                    version: dto.version.number,
                    modified: dto.version.when.unwrap_or_else(Utc::now),
                    children: Vec::new(),
                };

                let parent = node_at_mut(&mut root_node, &path);
                parent.children.push(node);
                let mut child_path = path.clone();
                child_path.push(parent.children.len() - 1);
                work.push(child_path);
            }
        }

        Ok(root_node)
    }
}

fn node_at<'a>(root: &'a RemoteTreeNode, path: &[usize]) -> &'a RemoteTreeNode {
    let mut node = root;
    for &idx in path {
        node = &node.children[idx];
    }
    node
}

fn node_at_mut<'a>(root: &'a mut RemoteTreeNode, path: &[usize]) -> &'a mut RemoteTreeNode {
    let mut node = root;
    for &idx in path {
        node = &mut node.children[idx];
    }
    node
}
