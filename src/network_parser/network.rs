//! 阻塞式 HTTP 传输层。
//!
//! API 请求把响应体读入内存；文件下载直接流式写入目标路径。
//! 两者都跟随重定向并校验证书（reqwest + rustls 默认行为）。

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::debug;

const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("incomplete body from {url}: expected {expected} bytes, got {written}")]
    Incomplete {
        url: String,
        expected: u64,
        written: u64,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    /// 本地文件系统错误重试也不会好转，其余（连接失败、非 2xx、半截响应）都值得再试。
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Io { .. } | TransportError::Build(_))
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// 流水线与远端之间唯一的网络接缝，测试中以内存实现替换。
pub trait Transport: Send + Sync {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, TransportError>;

    /// 下载到 `dest`，每次调用都截断重写目标文件。返回写入的字节数。
    fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64, TransportError>;
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("modular-downloader/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub struct HttpTransport {
    api: Client,
    files: Client,
}

impl HttpTransport {
    pub fn new(options: &TransportOptions) -> Result<Self, TransportError> {
        let api = Self::builder(options)
            .timeout(options.request_timeout)
            .build()
            .map_err(TransportError::Build)?;

        // 大文件下载不设整体超时，只限制建立连接的时间。
        let files = Self::builder(options)
            .timeout(None::<Duration>)
            .build()
            .map_err(TransportError::Build)?;

        Ok(Self { api, files })
    }

    fn builder(options: &TransportOptions) -> reqwest::blocking::ClientBuilder {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        default_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        Client::builder()
            .default_headers(default_headers)
            .user_agent(options.user_agent.clone())
            .connect_timeout(options.connect_timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, TransportError> {
        let mut req = self.api.get(url);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }

        let resp = req.send().map_err(|source| TransportError::Request {
            url: url.to_string(),
            source,
        })?;
        let status = resp.status().as_u16();
        let body = resp.text().map_err(|source| TransportError::Request {
            url: url.to_string(),
            source,
        })?;
        debug!(target: "network", "GET {} -> {} ({} bytes)", url, status, body.len());

        Ok(HttpResponse { status, body })
    }

    fn download_to_file(&self, url: &str, dest: &Path) -> Result<u64, TransportError> {
        let mut resp = self
            .files
            .get(url)
            .send()
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let expected = resp.content_length();

        let io_err = |source| TransportError::Io {
            path: dest.to_path_buf(),
            source,
        };
        // File::create 截断旧内容：上一次失败留下的半截文件不会被追加。
        let file = File::create(dest).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        let written = resp
            .copy_to(&mut writer)
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;
        writer.flush().map_err(io_err)?;

        if let Some(expected) = expected
            && expected != written
        {
            return Err(TransportError::Incomplete {
                url: url.to_string(),
                expected,
                written,
            });
        }

        debug!(target: "network", "downloaded {} -> {} ({} bytes)", url, dest.display(), written);
        Ok(written)
    }
}
