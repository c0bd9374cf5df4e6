//! OSF HTTP client: whole-project archives, folder traversal and node metadata.

use super::retry::RetryPolicy;
use super::AcquireError;
use crate::project::ProjectId;
use crate::VERSION;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    data: Vec<Entry>,
    #[serde(default)]
    links: Option<ListingLinks>,
}

#[derive(Debug, Deserialize)]
struct ListingLinks {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    attributes: EntryAttributes,
    #[serde(default)]
    links: Option<EntryLinks>,
    #[serde(default)]
    relationships: Option<EntryRelationships>,
}

#[derive(Debug, Deserialize)]
struct EntryAttributes {
    kind: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct EntryLinks {
    download: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntryRelationships {
    files: Option<Relation>,
}

#[derive(Debug, Deserialize)]
struct Relation {
    links: RelationLinks,
}

#[derive(Debug, Deserialize)]
struct RelationLinks {
    related: RelatedLink,
}

#[derive(Debug, Deserialize)]
struct RelatedLink {
    href: String,
}

#[derive(Debug, Deserialize)]
struct NodeResponse {
    data: NodeData,
}

#[derive(Debug, Deserialize)]
struct NodeData {
    attributes: NodeAttributes,
}

/// Title and description of an OSF node
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NodeAttributes {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub struct OsfClient {
    http: reqwest::Client,
    api_base: String,
    files_base: String,
    retry: RetryPolicy,
    backoffs: AtomicU32,
    show_progress: bool,
}

impl OsfClient {
    pub fn new(
        api_base: impl Into<String>,
        files_base: impl Into<String>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, AcquireError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("reprocheck/{}", VERSION))
            .build()
            .map_err(AcquireError::Client)?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            files_base: files_base.into().trim_end_matches('/').to_string(),
            retry,
            backoffs: AtomicU32::new(0),
            show_progress: true,
        })
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn archive_url(&self, id: &ProjectId) -> String {
        format!(
            "{}/v1/resources/{}/providers/osfstorage/?zip=",
            self.files_base, id
        )
    }

    pub fn files_url(&self, id: &ProjectId) -> String {
        format!("{}/v2/nodes/{}/files/osfstorage/", self.api_base, id)
    }

    pub fn node_url(&self, id: &ProjectId) -> String {
        format!("{}/v2/nodes/{}/", self.api_base, id)
    }

    /// Number of rate-limit sleeps performed so far
    pub fn backoff_count(&self) -> u32 {
        self.backoffs.load(Ordering::SeqCst)
    }

    /// GET with bounded retry on HTTP 429. Any other non-success status fails at once.
    async fn get(&self, url: &str) -> Result<Response, AcquireError> {
        let mut attempt = 1;
        loop {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|source| AcquireError::Transport {
                    url: url.to_string(),
                    source,
                })?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if !self.retry.should_retry(attempt) {
                    return Err(AcquireError::RateLimited {
                        url: url.to_string(),
                        attempts: attempt,
                    });
                }

                let delay = self.retry.delay_for(attempt);
                warn!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited by OSF, backing off"
                );
                self.backoffs.fetch_add(1, Ordering::SeqCst);
                sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                return Err(AcquireError::Http {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            return Ok(response);
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, AcquireError> {
        let response = self.get(url).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| AcquireError::Malformed {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    /// Streams the whole-project archive to `dest`. The body goes to a `.part`
    /// file first so an interrupted download never leaves a truncated archive.
    pub async fn download_archive(&self, id: &ProjectId, dest: &Path) -> Result<u64, AcquireError> {
        let url = self.archive_url(id);
        info!(project = %id, url = %url, "Downloading project archive");

        let response = self.get(&url).await?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let part = dest.with_extension("zip.part");
        match self.stream_to_file(response, &part, &url, id.as_str()).await {
            Ok(bytes) => {
                fs::rename(&part, dest).await?;
                info!(project = %id, bytes, "Archive downloaded");
                Ok(bytes)
            }
            Err(e) => {
                let _ = fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn stream_to_file(
        &self,
        response: Response,
        path: &Path,
        url: &str,
        label: &str,
    ) -> Result<u64, AcquireError> {
        let bar = self.progress_bar(response.content_length(), label);
        let mut file = fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| AcquireError::Transport {
                url: url.to_string(),
                source,
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            bar.inc(chunk.len() as u64);
        }

        file.flush().await?;
        bar.finish_and_clear();
        Ok(written)
    }

    fn progress_bar(&self, total: Option<u64>, label: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = match total {
            Some(len) => {
                let bar = ProgressBar::new(len);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
                    )
                    .map(|s| s.progress_chars("=>-"))
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{msg} {spinner} {bytes}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        };
        bar.set_message(label.to_string());
        bar
    }

    /// Downloads every file of the project's osfstorage provider into `dest`,
    /// recreating the folder structure. Returns the number of files written.
    pub async fn download_tree(&self, id: &ProjectId, dest: &Path) -> Result<usize, AcquireError> {
        info!(project = %id, "Traversing OSF storage folders");
        fs::create_dir_all(dest).await?;

        let mut pending: Vec<(String, PathBuf)> = vec![(self.files_url(id), dest.to_path_buf())];
        let mut files = 0usize;

        while let Some((url, dir)) = pending.pop() {
            let mut page_url = Some(url);
            while let Some(url) = page_url.take() {
                let listing: Listing = self.get_json(&url).await?;

                for entry in listing.data {
                    let Some(name) = safe_name(&entry.attributes.name) else {
                        warn!(project = %id, name = %entry.attributes.name, "Skipping entry with unsafe name");
                        continue;
                    };

                    match entry.attributes.kind.as_str() {
                        "folder" => {
                            let Some(related) = entry
                                .relationships
                                .and_then(|r| r.files)
                                .map(|f| f.links.related.href)
                            else {
                                warn!(project = %id, folder = %name, "Folder has no file listing link");
                                continue;
                            };
                            let sub = dir.join(&name);
                            fs::create_dir_all(&sub).await?;
                            pending.push((related, sub));
                        }
                        _ => {
                            let Some(download) = entry.links.and_then(|l| l.download) else {
                                warn!(project = %id, file = %name, "File has no download link");
                                continue;
                            };
                            let target = dir.join(&name);
                            debug!(project = %id, file = %target.display(), "Downloading file");
                            let response = self.get(&download).await?;
                            let bytes = response.bytes().await.map_err(|source| {
                                AcquireError::Transport {
                                    url: download.clone(),
                                    source,
                                }
                            })?;
                            fs::write(&target, &bytes).await?;
                            files += 1;
                        }
                    }
                }

                page_url = listing.links.and_then(|l| l.next);
            }
        }

        info!(project = %id, files, "Folder traversal complete");
        Ok(files)
    }

    pub async fn node_attributes(&self, id: &ProjectId) -> Result<NodeAttributes, AcquireError> {
        let node: NodeResponse = self.get_json(&self.node_url(id)).await?;
        Ok(node.data.attributes)
    }
}

/// Final path component of a remote name; rejects `..`, empty names and separators
fn safe_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." || trimmed.contains(['/', '\\']) {
        return None;
    }
    Some(trimmed.to_string())
}
