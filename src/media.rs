//! Byte proxy helpers: streaming a resolved download URL back to a client
//! under a friendly file name.

use reqwest::header::CONTENT_TYPE;

use crate::{
    transport::{RequestKind, TransportError},
    util::HttpClient,
};

/// An upstream media response whose body has not been read yet.
pub struct MediaResponse {
    pub content_length: Option<u64>,
    pub response: reqwest::Response,
}

/// Content type implied by the file extension.
pub fn content_type_for(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "mp3" => "audio/mpeg",
        Some(ext) if ext == "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Makes `name` safe for a `Content-Disposition` header and most file systems.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_space = false;

    for c in name.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            out.push(c);
        } else {
            out.push('_');
        }
    }

    if out.is_empty() {
        "download".into()
    } else {
        out
    }
}

pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", sanitize_filename(filename))
}

/// Headers to send in front of the proxied bytes.
pub fn proxy_headers(filename: &str, content_length: Option<u64>) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("content-type", content_type_for(filename).to_string()),
        ("content-disposition", content_disposition(filename)),
        ("cache-control", "no-cache".to_string()),
    ];
    if let Some(len) = content_length {
        headers.push(("content-length", len.to_string()));
    }
    headers
}

impl HttpClient {
    /// Opens a resolved download URL. Redirects are followed up to the
    /// configured bound and transient failures are retried; any non-2xx
    /// final status is an error.
    pub async fn open_media(&self, url: &str) -> Result<MediaResponse, TransportError> {
        let response = self
            .media
            .get(url)
            .headers(self.headers(RequestKind::Api).clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }

        debug!(
            "Opened {} ({:?}, {:?} bytes)",
            response.url(),
            response.headers().get(CONTENT_TYPE),
            response.content_length()
        );

        Ok(MediaResponse {
            content_length: response.content_length(),
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("song.mp3"), "audio/mpeg");
        assert_eq!(content_type_for("clip.MP4"), "video/mp4");
        assert_eq!(content_type_for("archive.tar.gz"), "application/octet-stream");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn sanitized_names() {
        assert_eq!(sanitize_filename("My Song  (Live).mp3"), "My_Song__Live_.mp3");
        assert_eq!(sanitize_filename("a/b\\c\"d.mp4"), "a_b_c_d.mp4");
        assert_eq!(sanitize_filename("tab\there"), "tab_here");
        assert_eq!(sanitize_filename("日本"), "__");
        assert_eq!(sanitize_filename(""), "download");
    }

    #[test]
    fn disposition_and_headers() {
        assert_eq!(
            content_disposition("Never Gonna.mp3"),
            "attachment; filename=\"Never_Gonna.mp3\""
        );

        let headers = proxy_headers("x.mp4", Some(1024));
        assert!(headers.contains(&("content-type", "video/mp4".to_string())));
        assert!(headers.contains(&("content-length", "1024".to_string())));

        let headers = proxy_headers("x.bin", None);
        assert!(headers.contains(&("content-type", "application/octet-stream".to_string())));
        assert!(headers.iter().all(|(name, _)| *name != "content-length"));
    }
}
