use std::sync::Arc;

use crate::{
    cache::ConfigCache,
    config::ConfigLoader,
    error::Error,
    options::Options,
    protocol::{Format, ProtocolClient, Resolution},
    transport::Transport,
    youtube,
};

/// Turns a YouTube link into a direct download URL.
///
/// Cheap to share behind an `Arc`; concurrent `resolve` calls are
/// independent apart from the shared config cache.
pub struct Converter {
    config: ConfigCache,
    protocol: ProtocolClient,
}

impl Converter {
    pub fn new(transport: Arc<dyn Transport>, options: &Options) -> Self {
        let config = ConfigCache::new(
            ConfigLoader::new(transport.clone(), options),
            options.config_ttl,
        );
        let protocol = ProtocolClient::new(transport, config.clone(), options);

        Self { config, protocol }
    }

    pub async fn resolve(&self, url: &str, format: Format) -> Result<Resolution, Error> {
        let video_id = youtube::extract_video_id(url)
            .ok_or_else(|| Error::InvalidInput(format!("not a YouTube video link: {}", url)))?;
        info!("Video ID: {}", video_id);
        info!("Format: {}", format);

        self.protocol.run(video_id, format).await
    }

    pub fn config(&self) -> &ConfigCache {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        protocol::tests::{test_options, transport, CONVERTED},
        transport::mock::ok,
    };

    #[tokio::test]
    async fn resolves_link() {
        let t = transport(vec![
            ("conv.example/convert", vec![ok(CONVERTED)]),
            ("conv.example/progress", vec![ok(r#"{"progress": 3}"#)]),
        ]);
        let converter = Converter::new(t, &test_options());

        let res = converter
            .resolve("https://youtu.be/dQw4w9WgXcQ?si=x", Format::Video)
            .await
            .expect("Could not resolve");
        assert_eq!(
            res.download_url,
            "https://dl.example/download?id=1&s=1&v=dQw4w9WgXcQ&f=mp4"
        );
        assert_eq!(res.filename, "Rick_Astley___Never_Gonna_Give_You_Up.mp4");
        assert!(converter.config().cached().is_some());
    }

    #[tokio::test]
    async fn invalid_link() {
        let t = transport(vec![]);
        let converter = Converter::new(t.clone(), &test_options());

        let err = converter
            .resolve("https://vimeo.com/12345", Format::Audio)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        // Nothing touched the network
        assert!(t.requests().is_empty());
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_config_fetch() {
        let t = transport(vec![
            ("conv.example/convert", vec![ok(CONVERTED)]),
            ("conv.example/progress", vec![ok(r#"{"progress": 3}"#)]),
        ]);
        let converter = Arc::new(Converter::new(t.clone(), &test_options()));

        let links = [
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=9bZkp7q19f0",
            "https://www.youtube.com/shorts/aqz-KE-bpKQ",
            "https://youtu.be/kJQP7kiw5Fk",
        ];
        let results = futures::future::join_all(links.iter().map(|link| {
            let converter = converter.clone();
            async move { converter.resolve(link, Format::Audio).await }
        }))
        .await;

        for (link, result) in links.iter().zip(results) {
            let res = result.expect("Could not resolve");
            let id = youtube::extract_video_id(link).unwrap();
            assert!(res.download_url.ends_with(&format!("&v={}&f=mp3", id)));
        }
        assert_eq!(t.hits("ytmp3.as/AOPR/"), 1);
        assert_eq!(t.hits("/api/v1/init"), 4);
    }
}
