//! File persistence and the out-of-band HTTP download path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

/// Where merged or downloaded files end up.
pub trait FileSink: Send + Sync {
    fn save(&self, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf>;
}

/// Writes files into one directory, creating it when missing.
#[derive(Debug, Clone)]
pub struct DownloadDir {
    dir: PathBuf,
}

impl DownloadDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileSink for DownloadDir {
    fn save(&self, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let name = safe_file_name(name).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unusable file name: {name:?}"),
            )
        })?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        std::fs::write(&path, bytes)?;
        info!(path = %path.display(), size = bytes.len(), "Saved file");
        Ok(path)
    }
}

/// Reduce a server-supplied name to its final path component.
pub fn safe_file_name(name: &str) -> Option<&str> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last)
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to save file: {0}")]
    Save(#[from] std::io::Error),
}

/// Run `sink.save` on the blocking pool.
pub async fn save_blocking<B>(
    sink: Arc<dyn FileSink>,
    name: String,
    bytes: B,
) -> std::io::Result<PathBuf>
where
    B: AsRef<[u8]> + Send + 'static,
{
    tokio::task::spawn_blocking(move || sink.save(&name, bytes.as_ref()))
        .await
        .map_err(std::io::Error::other)?
}

/// GET `url` and hand the body to `sink` under `name`.
pub async fn fetch_to_sink(
    http: &reqwest::Client,
    url: &str,
    name: &str,
    sink: Arc<dyn FileSink>,
) -> Result<PathBuf, DownloadError> {
    debug!(url, "Starting HTTP download");
    let response = http.get(url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    debug!(size = bytes.len(), "HTTP download finished");
    Ok(save_blocking(sink, name.to_owned(), bytes).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn strips_directories_from_names() {
        assert_eq!(safe_file_name("report.txt"), Some("report.txt"));
        assert_eq!(safe_file_name("../../etc/passwd"), Some("passwd"));
        assert_eq!(safe_file_name("C:\\Users\\x\\a.log"), Some("a.log"));
        assert_eq!(safe_file_name("dir/"), None);
        assert_eq!(safe_file_name(".."), None);
        assert_eq!(safe_file_name(""), None);
    }

    #[test]
    fn download_dir_creates_and_writes() {
        let tmp = TempDir::new().unwrap();
        let sink = DownloadDir::new(tmp.path().join("nested/downloads"));
        let path = sink.save("../evil.bin", b"\x00\x01").unwrap();
        assert_eq!(path, tmp.path().join("nested/downloads/evil.bin"));
        assert_eq!(std::fs::read(&path).unwrap(), b"\x00\x01");
    }

    #[test]
    fn download_dir_rejects_unusable_name() {
        let tmp = TempDir::new().unwrap();
        let sink = DownloadDir::new(tmp.path());
        let err = sink.save("/", b"x").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn save_blocking_writes_through_sink() {
        let tmp = TempDir::new().unwrap();
        let sink: Arc<dyn FileSink> = Arc::new(DownloadDir::new(tmp.path()));
        let path = save_blocking(sink, "log.txt".into(), b"line".to_vec())
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"line");
    }

    /// One-shot HTTP server answering any request with `response`.
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut s, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = s.read(&mut buf).await;
            s.write_all(response.as_bytes()).await.unwrap();
            s.shutdown().await.unwrap();
        });
        format!("http://{addr}/files/f1")
    }

    #[tokio::test]
    async fn fetch_saves_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let tmp = TempDir::new().unwrap();
        let sink = Arc::new(DownloadDir::new(tmp.path()));
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let path = fetch_to_sink(&http, &url, "greeting.txt", sink).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn fetch_rejects_error_status() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let tmp = TempDir::new().unwrap();
        let sink = Arc::new(DownloadDir::new(tmp.path()));
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let err = fetch_to_sink(&http, &url, "missing.txt", sink).await.unwrap_err();
        assert!(matches!(err, DownloadError::Http(_)));
        assert!(!tmp.path().join("missing.txt").exists());
    }
}
