use std::{path::Path, sync::Arc};

use futures::{Stream, StreamExt};
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT},
    redirect,
};
use reqwest_cookie_store::CookieStoreMutex;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tokio::{fs::File, io::AsyncWriteExt};

use crate::{
    options::Options,
    stats::DownloadStatistics,
    transport::{RequestKind, TransportError},
};

pub struct HttpClient {
    /// Page and API calls. Never follows redirects or retries on its own.
    pub client: ClientWithMiddleware,
    /// Media downloads, with transient retries and bounded redirects.
    pub media: ClientWithMiddleware,
    pub cookies: Arc<CookieStoreMutex>,
    page_headers: HeaderMap,
    api_headers: HeaderMap,
}

impl HttpClient {
    pub fn new(options: &Options) -> Result<HttpClient, TransportError> {
        let cookies = Arc::new(CookieStoreMutex::default());
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

        let client = reqwest::Client::builder()
            .cookie_provider(cookies.clone())
            .redirect(redirect::Policy::none())
            .build()?;
        let client = reqwest_middleware::ClientBuilder::new(client).build();

        let media = reqwest::Client::builder()
            .cookie_provider(cookies.clone())
            .redirect(redirect::Policy::limited(options.max_media_redirects))
            .build()?;
        let media = reqwest_middleware::ClientBuilder::new(media)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(HttpClient {
            client,
            media,
            cookies,
            page_headers: page_headers(options)?,
            api_headers: api_headers(options)?,
        })
    }

    pub fn headers(&self, kind: RequestKind) -> &HeaderMap {
        match kind {
            RequestKind::Page => &self.page_headers,
            RequestKind::Api => &self.api_headers,
        }
    }

    pub async fn download_file(
        &self,
        url: &str,
        path: &Path,
        stats: &mut DownloadStatistics,
    ) -> Result<usize, TransportError> {
        let resp = self.open_media(url).await?;
        stats.bytes_total = resp.content_length;

        save_stream(resp.response.bytes_stream(), path, stats).await
    }
}

/// Writes `chunks` to `path` through a `.tmp` sibling that is renamed into
/// place at the end, or removed if anything fails on the way.
pub async fn save_stream<S, B, E>(
    chunks: S,
    path: &Path,
    stats: &mut DownloadStatistics,
) -> Result<usize, TransportError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    TransportError: From<E>,
{
    let temp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });

    let written = async {
        let mut chunks = std::pin::pin!(chunks);
        let mut file = File::create(&temp_path).await?;
        let mut size = 0;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            file.write_all(chunk.as_ref()).await?;
            size += chunk.as_ref().len();
            stats.bytes_downloaded = size as u64;
            stats.print();
        }

        file.flush().await?;
        Ok::<_, TransportError>(size)
    }
    .await;

    match written {
        Ok(size) => {
            tokio::fs::rename(&temp_path, path).await?;
            Ok(size)
        }
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&temp_path).await {
                warn!("Could not remove {}: {}", temp_path.display(), rm);
            }
            Err(e)
        }
    }
}

fn header(name: &'static str, value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|_| TransportError::InvalidHeader(name))
}

fn page_headers(options: &Options) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));
    headers.insert(USER_AGENT, header("user-agent", &options.user_agent)?);
    Ok(headers)
}

// The API rejects requests that do not look like the site's own XHR calls.
fn api_headers(options: &Options) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));
    headers.insert(ORIGIN, header("origin", &options.origin)?);
    headers.insert(
        HeaderName::from_static("priority"),
        HeaderValue::from_static("u=1, i"),
    );
    headers.insert(REFERER, header("referer", &options.referer)?);
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("empty"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("cors"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("cross-site"),
    );
    headers.insert(HeaderName::from_static("sec-gpc"), HeaderValue::from_static("1"));
    headers.insert(USER_AGENT, header("user-agent", &options.user_agent)?);
    Ok(headers)
}

/// Seconds since the Unix epoch, as the API expects in its `t` parameter.
pub fn unix_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn format_bytes(bytes: u64) -> String {
    let mut bytes = bytes as f64;
    let mut suffix = "B";

    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "KiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "MiB";
    }
    if bytes > 1024.0 {
        bytes /= 1024.0;
        suffix = "GiB";
    }

    format!("{:.2} {}", bytes, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_headers() {
        let client = HttpClient::new(&Options::default()).expect("Could not create HttpClient");

        let api = client.headers(RequestKind::Api);
        assert_eq!(api[ORIGIN], "https://ytmp3.as");
        assert_eq!(api[REFERER], "https://ytmp3.as/");
        assert_eq!(api["sec-fetch-mode"], "cors");
        assert_eq!(api["sec-fetch-site"], "cross-site");
        assert!(api[USER_AGENT].to_str().unwrap().contains("iPhone"));

        let page = client.headers(RequestKind::Page);
        assert!(page.get(ORIGIN).is_none());
        assert!(page[ACCEPT].to_str().unwrap().starts_with("text/html"));
    }

    #[test]
    fn bad_user_agent() {
        let opts = Options {
            user_agent: "bad\nagent".into(),
            ..Options::default()
        };
        assert!(matches!(
            HttpClient::new(&opts),
            Err(TransportError::InvalidHeader("user-agent"))
        ));
    }

    #[test]
    fn bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MiB");
    }

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ytconv-{}-{}", std::process::id(), name))
    }

    fn quiet_stats() -> DownloadStatistics {
        DownloadStatistics {
            quiet: true,
            ..DownloadStatistics::new()
        }
    }

    #[tokio::test]
    async fn save_stream_renames_into_place() {
        let path = scratch_path("complete.mp3");
        let chunks: Vec<Result<&[u8], TransportError>> = vec![Ok(&b"ID3"[..]), Ok(&b"data"[..])];
        let mut stats = quiet_stats();

        let size = save_stream(futures::stream::iter(chunks), &path, &mut stats)
            .await
            .expect("Could not save stream");

        assert_eq!(size, 7);
        assert_eq!(stats.bytes_downloaded, 7);
        assert_eq!(std::fs::read(&path).unwrap(), b"ID3data");
        assert!(!path.with_extension("mp3.tmp").exists());
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn failed_stream_leaves_nothing_behind() {
        let path = scratch_path("broken.mp4");
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        let chunks: Vec<Result<&[u8], TransportError>> = vec![Ok(&b"partial"[..]), Err(reset.into())];
        let mut stats = quiet_stats();

        let err = save_stream(futures::stream::iter(chunks), &path, &mut stats)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Io(_)));
        assert!(!path.exists());
        assert!(!path.with_extension("mp4.tmp").exists());
    }

    #[test]
    fn timestamp_is_seconds() {
        let t = unix_timestamp();
        // Seconds, not milliseconds
        assert!(t > 1_600_000_000 && t < 10_000_000_000);
    }
}
