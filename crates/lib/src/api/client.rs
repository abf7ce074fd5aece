//! HTTP client for the chat and file-indexing service (`/api7/*`).

use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::status::{status_updates, StatusStream};
use super::stream::{decode_fragments, FragmentStream};
use crate::config::{self, Config, DEFAULT_API_HOST};
use crate::identity::SessionContext;

const CHAT_PATH: &str = "/api7/chat2_private_use";
const ASKDOC_PATH: &str = "/api7/askdoc";
const UPLOAD_PATH: &str = "/api7/uploadfile";
const LIST_FILES_PATH: &str = "/api7/getfiles";
const STATUS_PATH: &str = "/api7/status";
const EMBED_PATH: &str = "/api7/embed";

const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error: {0}")]
    Api(String),
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no data received for {0:?}")]
    Timeout(Duration),
}

/// Body of a streaming chat request. Plain chat and document queries share the pipeline;
/// only the payload and the endpoint differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StreamRequest {
    Chat {
        user: String,
        prompt: String,
    },
    AskDoc {
        user: String,
        query: String,
        file_id_list: Vec<String>,
    },
}

impl StreamRequest {
    pub fn path(&self) -> &'static str {
        match self {
            StreamRequest::Chat { .. } => CHAT_PATH,
            StreamRequest::AskDoc { .. } => ASKDOC_PATH,
        }
    }
}

/// Id fields arrive as strings or numbers depending on the service version.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawUploadedFile {
    #[serde(default)]
    file_id: Option<RawId>,
    #[serde(default)]
    timestamp: Option<RawId>,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    uploadtime: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    selected: bool,
}

/// One entry of the service's file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawUploadedFile")]
pub struct UploadedFile {
    pub file_id: String,
    pub filename: String,
    pub uploadtime: String,
    pub url: String,
    pub selected: bool,
}

impl TryFrom<RawUploadedFile> for UploadedFile {
    type Error = String;

    fn try_from(raw: RawUploadedFile) -> Result<Self, Self::Error> {
        let file_id = raw
            .file_id
            .or(raw.timestamp)
            .map(RawId::into_string)
            .ok_or_else(|| format!("file entry {:?} has no file_id or timestamp", raw.filename))?;
        Ok(Self {
            file_id,
            filename: raw.filename,
            uploadtime: raw.uploadtime,
            url: raw.url,
            selected: raw.selected,
        })
    }
}

/// Raw upload response; see [`UploadResponse::outcome`].
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    task_id: Option<RawId>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    uploadtime: Option<String>,
    #[serde(default)]
    filenames: Vec<String>,
}

/// What the service did with an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Indexing runs in the background; follow it on the status channel.
    Queued { task_id: String },
    /// The file was uploaded before.
    Duplicate { filename: String, uploadtime: String },
    /// Indexed before the response was sent.
    Indexed { filenames: Vec<String> },
}

impl UploadResponse {
    /// `task_id` wins, then `filename` (duplicate), then `filenames` (indexed).
    pub fn outcome(self) -> Result<UploadOutcome, ApiError> {
        if let Some(task_id) = self.task_id {
            return Ok(UploadOutcome::Queued {
                task_id: task_id.into_string(),
            });
        }
        if let Some(filename) = self.filename {
            return Ok(UploadOutcome::Duplicate {
                filename,
                uploadtime: self.uploadtime.unwrap_or_default(),
            });
        }
        if !self.filenames.is_empty() {
            return Ok(UploadOutcome::Indexed {
                filenames: self.filenames,
            });
        }
        Err(ApiError::Api("unrecognized upload response".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    file_id: &'a str,
    file_url: &'a str,
}

/// Client for the service API.
#[derive(Clone)]
pub struct ApiClient {
    host: String,
    client: reqwest::Client,
    upload_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl ApiClient {
    pub fn new(host: Option<String>) -> Self {
        let host = host
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_HOST.to_string());
        Self {
            host,
            client: reqwest::Client::new(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            idle_timeout: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Some(config::resolve_api_host(config)))
            .with_upload_timeout(config.api.upload_timeout())
            .with_idle_timeout(config.api.stream_idle_timeout())
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(ApiError::Api(format!("{} {}", status, body)))
    }

    /// POST a chat or document query; the response body comes back as decoded fragments.
    pub async fn stream(
        &self,
        session: &SessionContext,
        request: &StreamRequest,
    ) -> Result<FragmentStream, ApiError> {
        let url = self.url(request.path());
        log::debug!("POST {} as {}", url, session.user);
        let res = self
            .client
            .post(&url)
            .header(AUTHORIZATION, session.authorization())
            .json(request)
            .send()
            .await?;
        let res = Self::check(res).await?;
        Ok(decode_fragments(res.bytes_stream(), self.idle_timeout))
    }

    /// POST /api7/uploadfile (multipart), one `files` part per path.
    pub async fn upload_files(&self, paths: &[PathBuf]) -> Result<UploadOutcome, ApiError> {
        let mut form = reqwest::multipart::Form::new();
        for path in paths {
            let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::Io {
                path: path.clone(),
                source,
            })?;
            let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name(path));
            form = form.part("files", part);
        }
        let url = self.url(UPLOAD_PATH);
        log::info!("uploading {} file(s) to {}", paths.len(), url);
        let res = self
            .client
            .post(&url)
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await?;
        let res = Self::check(res).await?;
        let body = res.text().await?;
        let response: UploadResponse = serde_json::from_str(&body)?;
        response.outcome()
    }

    /// POST /api7/getfiles: the full file list.
    pub async fn list_files(&self) -> Result<Vec<UploadedFile>, ApiError> {
        let res = self.client.post(self.url(LIST_FILES_PATH)).send().await?;
        let res = Self::check(res).await?;
        let body = res.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// GET /api7/status/{task_id}: server-sent status labels until `done`.
    pub async fn status_events(&self, task_id: &str) -> Result<StatusStream, ApiError> {
        let url = format!("{}/{}", self.url(STATUS_PATH), task_id);
        let res = self.client.get(&url).send().await?;
        let res = Self::check(res).await?;
        Ok(status_updates(res.bytes_stream()))
    }

    /// POST /api7/embed: (re)index one stored file.
    pub async fn embed_file(&self, file_id: &str, file_url: &str) -> Result<serde_json::Value, ApiError> {
        let res = self
            .client
            .post(self.url(EMBED_PATH))
            .json(&EmbedRequest { file_id, file_url })
            .send()
            .await?;
        let res = Self::check(res).await?;
        let body = res.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}
