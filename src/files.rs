//! Downloader for Slack file attachments.
//!
//! Downloads run as detached tasks so message projection never blocks on
//! them; the caller immediately gets the URL token to print (either Slack's
//! private URL or the rewritten proxy URL of the local copy).

use std::path::PathBuf;
use std::time::Duration;

use crate::slack::File;

const MAX_HTTP_ATTEMPTS: u32 = 3;
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub struct FileHandler {
    http: reqwest::Client,
    token: String,
    download_location: Option<PathBuf>,
    proxy_prefix: Option<String>,
}

impl FileHandler {
    pub fn new(
        token: &str,
        download_location: Option<PathBuf>,
        proxy_prefix: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.to_string(),
            download_location,
            proxy_prefix,
        }
    }

    /// Start downloading `file` to the configured location and return the
    /// URL to print on IRC. Without a download location (or for external
    /// files) this is Slack's private URL and nothing is downloaded.
    /// Identical local paths are overwritten.
    pub fn download(&self, file: &File) -> String {
        let Some(ref dir) = self.download_location else {
            return file.url_private.clone();
        };
        if file.is_external || self.token.is_empty() {
            return file.url_private.clone();
        }
        let local_name = format!("{}_{}.{}", file.id, file.title, file.filetype);
        let path = dir.join(&local_name);
        let url = file.url_private.clone();
        let token = self.token.clone();
        let http = self.http.clone();
        tokio::spawn(async move {
            if let Err(e) = fetch_to_file(&http, &url, &token, &path).await {
                tracing::warn!(%url, error = %e, "file download failed");
            }
        });
        match self.proxy_prefix {
            Some(ref prefix) => rewrite_url(prefix, &local_name)
                .unwrap_or_else(|| file.url_private.clone()),
            None => file.url_private.clone(),
        }
    }
}

/// Join the local file name onto the proxy prefix, path-escaped.
fn rewrite_url(prefix: &str, local_name: &str) -> Option<String> {
    let base = url::Url::parse(prefix).ok()?;
    base.join(local_name).ok().map(|u| u.to_string())
}

fn retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::INTERNAL_SERVER_ERROR
        || status == reqwest::StatusCode::BAD_GATEWAY
}

fn retryable_net_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

async fn fetch_to_file(
    http: &reqwest::Client,
    url: &str,
    token: &str,
    path: &std::path::Path,
) -> anyhow::Result<()> {
    let mut attempt = 0u32;
    let resp = loop {
        let result = http.get(url).bearer_auth(token).send().await;
        match result {
            Ok(resp) if retryable_status(resp.status()) && attempt + 1 < MAX_HTTP_ATTEMPTS => {}
            Ok(resp) => break resp,
            Err(ref e) if retryable_net_error(e) && attempt + 1 < MAX_HTTP_ATTEMPTS => {}
            Err(e) => return Err(e.into()),
        }
        // quadratic backoff between attempts
        tokio::time::sleep(RETRY_INTERVAL * attempt * attempt).await;
        attempt += 1;
    };
    if resp.status() != reqwest::StatusCode::OK {
        anyhow::bail!("got {} while downloading", resp.status());
    }
    let bytes = resp.bytes().await?;
    tokio::fs::write(path, &bytes).await?;
    tracing::debug!(path = %path.display(), size = bytes.len(), "downloaded file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str, title: &str, filetype: &str, external: bool) -> File {
        File {
            id: id.to_string(),
            title: title.to_string(),
            filetype: filetype.to_string(),
            url_private: "https://files.slack.com/f/orig".to_string(),
            is_external: external,
        }
    }

    #[tokio::test]
    async fn no_download_location_passes_url_through() {
        let handler = FileHandler::new("tok", None, None);
        assert_eq!(
            handler.download(&file("F1", "pic", "png", false)),
            "https://files.slack.com/f/orig"
        );
    }

    #[tokio::test]
    async fn external_files_pass_url_through() {
        let handler = FileHandler::new(
            "tok",
            Some(std::env::temp_dir()),
            Some("https://proxy.example.com/".to_string()),
        );
        assert_eq!(
            handler.download(&file("F1", "pic", "png", true)),
            "https://files.slack.com/f/orig"
        );
    }

    #[tokio::test]
    async fn proxy_prefix_rewrites_and_escapes() {
        let handler = FileHandler::new(
            "tok",
            Some(std::env::temp_dir()),
            Some("https://proxy.example.com/files/".to_string()),
        );
        let out = handler.download(&file("F1", "my pic", "png", false));
        assert_eq!(out, "https://proxy.example.com/files/F1_my%20pic.png");
    }

    #[test]
    fn rewrite_url_rejects_bad_prefix() {
        assert!(rewrite_url("not a url", "f.png").is_none());
    }
}
