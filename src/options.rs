//! Task options — immutable, validated transfer descriptions
//!
//! An option set is bound to exactly one protocol family and validated
//! before any task record or loader exists. Once a loader is built from it,
//! the options never change.

use crate::error::{Result, TaskError};
use crate::types::{GroupKind, Priority, ProtocolKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use url::Url;

/// FTP login credentials
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtpCredentials {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

/// Protocol-specific half of a task description
///
/// Serialized into the task record so an interrupted task can rebuild its
/// adapter after a restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum SourceSpec {
    /// HTTP or HTTPS single file
    Http {
        /// Extra request headers sent on probes and transfers
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// FTP single file
    Ftp {
        /// Login credentials; anonymous when absent
        #[serde(default)]
        credentials: Option<FtpCredentials>,
    },
}

impl SourceSpec {
    /// Protocol family of this spec
    pub fn kind(&self) -> ProtocolKind {
        match self {
            SourceSpec::Http { .. } => ProtocolKind::Http,
            SourceSpec::Ftp { .. } => ProtocolKind::Ftp,
        }
    }
}

/// Immutable description of a single transfer task
///
/// Built through the validated constructors; validation failures are
/// rejected before any task record exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Source URL
    pub url: String,
    /// Destination file path
    pub file_path: PathBuf,
    /// Protocol-specific configuration
    pub source: SourceSpec,
    /// Queue priority
    pub priority: Priority,
}

impl TaskOptions {
    /// Describe an HTTP/HTTPS single-file transfer
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidSource`] when the URL is empty, does not
    /// parse, or is not an `http`/`https` address, or when the destination
    /// path is empty.
    pub fn http(url: impl Into<String>, file_path: impl Into<PathBuf>) -> Result<Self> {
        let url = url.into();
        let parsed = parse_source_url(&url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TaskError::InvalidSource(format!(
                "expected an http/https url, got scheme '{}'",
                parsed.scheme()
            ))
            .into());
        }

        Ok(Self {
            url,
            file_path: non_empty_path(file_path.into())?,
            source: SourceSpec::Http {
                headers: BTreeMap::new(),
            },
            priority: Priority::Normal,
        })
    }

    /// Describe an FTP single-file transfer
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidSource`] when the URL is empty, does not
    /// parse, is not an `ftp` address, or when the destination path is empty.
    pub fn ftp(url: impl Into<String>, file_path: impl Into<PathBuf>) -> Result<Self> {
        let url = url.into();
        let parsed = parse_source_url(&url)?;
        if parsed.scheme() != "ftp" {
            return Err(TaskError::InvalidSource(format!(
                "expected an ftp url, got scheme '{}'",
                parsed.scheme()
            ))
            .into());
        }

        Ok(Self {
            url,
            file_path: non_empty_path(file_path.into())?,
            source: SourceSpec::Ftp { credentials: None },
            priority: Priority::Normal,
        })
    }

    /// Add a request header (HTTP sources only; ignored for FTP)
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let SourceSpec::Http { headers } = &mut self.source {
            headers.insert(name.into(), value.into());
        }
        self
    }

    /// Set FTP credentials (FTP sources only; ignored for HTTP)
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        if let SourceSpec::Ftp { credentials } = &mut self.source {
            *credentials = Some(FtpCredentials {
                username: username.into(),
                password: password.into(),
            });
        }
        self
    }

    /// Set the queue priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Deterministic identity key for this source
    ///
    /// The normalized URL; two option sets naming the same source resolve to
    /// the same task record.
    pub fn source_key(&self) -> String {
        normalize_url(&self.url)
    }
}

/// Immutable description of a composite (group) task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOptions {
    /// Group kind
    pub kind: GroupKind,
    /// Member URLs (URL-list groups); empty for FTP directories until enumeration
    pub urls: Vec<String>,
    /// Directory URL (FTP-directory groups); empty for URL lists
    pub dir_url: String,
    /// Destination directory for member files
    pub dir_path: PathBuf,
    /// Login credentials for FTP directories
    pub credentials: Option<FtpCredentials>,
    /// Queue priority applied to every member
    pub priority: Priority,
}

impl GroupOptions {
    /// Describe a group over an explicit list of HTTP/HTTPS URLs
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidSource`] when the list is empty or any
    /// member URL fails HTTP validation, or when the directory path is empty.
    pub fn url_list(urls: Vec<String>, dir_path: impl Into<PathBuf>) -> Result<Self> {
        if urls.is_empty() {
            return Err(TaskError::InvalidSource("group url list is empty".into()).into());
        }
        for url in &urls {
            let parsed = parse_source_url(url)?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(TaskError::InvalidSource(format!(
                    "group member '{url}' is not an http/https url"
                ))
                .into());
            }
        }

        Ok(Self {
            kind: GroupKind::UrlList,
            urls,
            dir_url: String::new(),
            dir_path: non_empty_path(dir_path.into())?,
            credentials: None,
            priority: Priority::Normal,
        })
    }

    /// Describe a group over an FTP directory; members are enumerated by
    /// listing the directory when the group starts
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidSource`] when the URL is empty, does not
    /// parse, is not an `ftp` address, or when the directory path is empty.
    pub fn ftp_dir(dir_url: impl Into<String>, dir_path: impl Into<PathBuf>) -> Result<Self> {
        let dir_url = dir_url.into();
        let parsed = parse_source_url(&dir_url)?;
        if parsed.scheme() != "ftp" {
            return Err(TaskError::InvalidSource(format!(
                "expected an ftp url, got scheme '{}'",
                parsed.scheme()
            ))
            .into());
        }

        Ok(Self {
            kind: GroupKind::FtpDir,
            urls: Vec::new(),
            dir_url,
            dir_path: non_empty_path(dir_path.into())?,
            credentials: None,
            priority: Priority::Normal,
        })
    }

    /// Set FTP credentials (FTP-directory groups)
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(FtpCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the queue priority applied to every member
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Deterministic identity hash for this group
    ///
    /// SHA-256 over the ordered member URLs for URL lists, or over the
    /// normalized directory URL for FTP directories. Distinct source sets
    /// yield distinct hashes; the same ordered set always yields the same.
    pub fn group_hash(&self) -> String {
        match self.kind {
            GroupKind::UrlList => group_hash_for_urls(&self.urls),
            GroupKind::FtpDir => {
                let mut hasher = Sha256::new();
                hasher.update(b"ftp-dir\n");
                hasher.update(normalize_url(&self.dir_url).as_bytes());
                hex_digest(hasher)
            }
        }
    }
}

/// SHA-256 hash over an ordered URL list, hex-encoded
pub(crate) fn group_hash_for_urls(urls: &[String]) -> String {
    let mut hasher = Sha256::new();
    for url in urls {
        hasher.update(normalize_url(url).as_bytes());
        hasher.update(b"\n");
    }
    hex_digest(hasher)
}

/// Identity key for a group member: scoped by the group hash so the same URL
/// can exist both as a standalone task and inside a group
pub(crate) fn member_source_key(group_hash: &str, url: &str) -> String {
    format!("{group_hash}:{}", normalize_url(url))
}

fn hex_digest(hasher: Sha256) -> String {
    use std::fmt::Write;

    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // Writing to a String cannot fail
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Normalize a URL for identity comparison: parsed form with the default
/// port and trailing-slash noise removed; unparseable input falls back to a
/// trimmed copy
pub(crate) fn normalize_url(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(parsed) => {
            let mut normalized = parsed.to_string();
            while normalized.ends_with('/') {
                normalized.pop();
            }
            normalized
        }
        Err(_) => url.trim().to_string(),
    }
}

fn parse_source_url(url: &str) -> Result<Url> {
    if url.trim().is_empty() {
        return Err(TaskError::InvalidSource("source url is empty".into()).into());
    }
    Url::parse(url.trim())
        .map_err(|e| TaskError::InvalidSource(format!("malformed url '{url}': {e}")).into())
}

fn non_empty_path(path: PathBuf) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(TaskError::InvalidSource("destination path is empty".into()).into());
    }
    Ok(path)
}
