use std::{
    fmt,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{de::DeserializeOwned, Deserialize};
use serde_aux::prelude::*;
use tokio_retry::strategy::FixedInterval;

use crate::{
    auth,
    cache::ConfigCache,
    error::{Error, Phase, REJECTION_CODES},
    options::Options,
    transport::{RequestKind, Transport},
    util,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Audio,
    Video,
}

impl Format {
    /// Value of the `f` parameter, also used as the file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Audio => "mp3",
            Format::Video => "mp4",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" | "audio" => Ok(Format::Audio),
            "mp4" | "video" => Ok(Format::Video),
            _ => Err(Error::InvalidInput(format!(
                "unknown format '{}', use mp3 or mp4",
                s
            ))),
        }
    }
}

/// Final output of a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub download_url: String,
    pub filename: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Converting,
    Polling,
    Resolved,
}

/// Everything learned about one conversion while it runs.
#[derive(Debug, Clone)]
pub struct ConversionSession {
    pub video_id: String,
    pub format: Format,
    pub state: State,
    pub convert_url: Option<String>,
    pub progress_url: Option<String>,
    pub download_url: Option<String>,
    pub title: Option<String>,
}

impl ConversionSession {
    pub fn new(video_id: &str, format: Format) -> Self {
        Self {
            video_id: video_id.to_string(),
            format,
            state: State::Init,
            convert_url: None,
            progress_url: None,
            download_url: None,
            title: None,
        }
    }

    fn enter(&mut self, state: State) {
        debug!("{}: {:?} -> {:?}", self.video_id, self.state, state);
        self.state = state;
    }

    /// Builds the byte source URL and file name once a download URL is known.
    pub fn resolution(&self) -> Option<Resolution> {
        let download_url = self.download_url.as_deref()?;
        Some(Resolution {
            download_url: append_query(
                download_url,
                &[
                    ("s", "1"),
                    ("v", self.video_id.as_str()),
                    ("f", self.format.extension()),
                ],
            ),
            filename: filename_for(self.title.as_deref(), &self.video_id, self.format),
            title: self.title.clone(),
        })
    }
}

/// `title` with every character outside `[A-Za-z0-9]` replaced by `_`, or
/// the video id when there is no title.
pub fn filename_for(title: Option<&str>, video_id: &str, format: Format) -> String {
    let stem = match title {
        Some(t) => t
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect(),
        None => video_id.to_string(),
    };
    format!("{}.{}", stem, format.extension())
}

/// Removes every `name=` pair from the query string of `url`.
pub fn strip_query_param(url: &str, name: &str) -> String {
    let (base, query) = match url.split_once('?') {
        Some(parts) => parts,
        None => return url.to_string(),
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty() && pair.split('=').next() != Some(name))
        .collect();

    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, kept.join("&"))
    }
}

pub fn append_query(url: &str, pairs: &[(&str, &str)]) -> String {
    let mut out = url.to_string();
    for (key, value) in pairs {
        out.push(if out.contains('?') { '&' } else { '?' });
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

#[derive(Debug, Deserialize)]
struct InitResponse {
    #[serde(rename = "convertURL")]
    convert_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    error: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    #[serde(rename = "progressURL")]
    progress_url: Option<String>,
    #[serde(rename = "downloadURL")]
    download_url: Option<String>,
    title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    error: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    redirect: Option<i64>,
    #[serde(rename = "redirectURL")]
    redirect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgressResponse {
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    progress: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    error: Option<i64>,
}

const STATUSES: [&str; 4] = [
    "checking video",
    "extracting video",
    "converting video",
    "completed",
];

/// What the convert phase hands to polling and resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub progress_url: Option<String>,
    pub download_url: String,
    pub title: Option<String>,
}

/// Drives init, convert and progress calls against the converter API.
pub struct ProtocolClient {
    transport: Arc<dyn Transport>,
    config: ConfigCache,
    init_url: String,
    max_convert_redirects: usize,
    poll_interval: Duration,
    poll_timeout: Duration,
    max_poll_attempts: u32,
}

impl ProtocolClient {
    pub fn new(transport: Arc<dyn Transport>, config: ConfigCache, options: &Options) -> Self {
        Self {
            transport,
            config,
            init_url: options.init_url.clone(),
            max_convert_redirects: options.max_convert_redirects,
            poll_interval: options.poll_interval,
            poll_timeout: options.poll_timeout,
            max_poll_attempts: options.max_poll_attempts.max(1),
        }
    }

    async fn call<T: DeserializeOwned>(&self, phase: Phase, url: &str) -> Result<T, Error> {
        let resp = self
            .transport
            .get(url, RequestKind::Api)
            .await
            .map_err(|source| Error::Network { phase, source })?;

        if !resp.is_success() {
            return Err(Error::UnexpectedStatus {
                phase,
                status: resp.status,
            });
        }

        serde_json::from_str(&resp.body).map_err(|e| Error::MalformedResponse {
            phase,
            reason: e.to_string(),
        })
    }

    /// Returns the convert URL for this session.
    pub async fn initialize(&self) -> Result<String, Error> {
        let table = self.config.get().await?;
        let param = auth::token_param(&table)?;
        let token = auth::derive_token(&table)?;
        let token = urlencoding::encode(&token);
        let timestamp = util::unix_timestamp().to_string();
        let url = append_query(
            &self.init_url,
            &[(param.as_str(), token.as_ref()), ("t", timestamp.as_str())],
        );

        info!("Initializing...");
        let resp: InitResponse = self.call(Phase::Init, &url).await?;

        if let Some(code) = resp.error.filter(|&c| c != 0) {
            return Err(Error::Protocol {
                phase: Phase::Init,
                code,
            });
        }

        non_empty(resp.convert_url).ok_or_else(|| Error::MalformedResponse {
            phase: Phase::Init,
            reason: "missing convertURL".into(),
        })
    }

    pub async fn convert(
        &self,
        convert_url: &str,
        video_id: &str,
        format: Format,
    ) -> Result<Converted, Error> {
        let mut base = convert_url.to_string();

        for hop in 0..=self.max_convert_redirects {
            // Upstream sometimes hands back a URL that already carries v=
            let timestamp = util::unix_timestamp().to_string();
            let url = append_query(
                &strip_query_param(&base, "v"),
                &[
                    ("v", video_id),
                    ("f", format.extension()),
                    ("t", timestamp.as_str()),
                ],
            );

            info!("Converting...");
            let resp: ConvertResponse = self.call(Phase::Convert, &url).await?;

            if let Some(code) = resp.error.filter(|&c| c != 0) {
                if REJECTION_CODES.contains(&code) {
                    warn!("Upstream refused to convert {} (code {})", video_id, code);
                }
                return Err(Error::Protocol {
                    phase: Phase::Convert,
                    code,
                });
            }

            if resp.redirect == Some(1) {
                if let Some(next) = non_empty(resp.redirect_url) {
                    debug!("Following convert redirect {} to {}", hop + 1, next);
                    base = next;
                    continue;
                }
            }

            let download_url =
                non_empty(resp.download_url).ok_or_else(|| Error::MalformedResponse {
                    phase: Phase::Convert,
                    reason: "missing downloadURL".into(),
                })?;

            return Ok(Converted {
                progress_url: non_empty(resp.progress_url),
                download_url,
                title: non_empty(resp.title),
            });
        }

        Err(Error::RedirectLoop {
            hops: self.max_convert_redirects,
        })
    }

    /// Polls until the conversion reports completion, then hands back
    /// `download_url`.
    pub async fn poll_progress(
        &self,
        progress_url: &str,
        download_url: &str,
    ) -> Result<String, Error> {
        let started = Instant::now();
        let mut delays =
            FixedInterval::new(self.poll_interval).take(self.max_poll_attempts as usize - 1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let timestamp = util::unix_timestamp().to_string();
            let url = append_query(progress_url, &[("t", timestamp.as_str())]);
            let resp: ProgressResponse = self.call(Phase::Progress, &url).await?;

            if let Some(code) = resp.error.filter(|&c| c > 0) {
                return Err(Error::Protocol {
                    phase: Phase::Progress,
                    code,
                });
            }

            let progress = resp.progress.ok_or_else(|| Error::MalformedResponse {
                phase: Phase::Progress,
                reason: "missing progress".into(),
            })?;
            if progress >= 3 {
                info!("Status: completed");
                return Ok(download_url.to_string());
            }

            info!(
                "Status: {}...",
                usize::try_from(progress)
                    .ok()
                    .and_then(|p| STATUSES.get(p))
                    .unwrap_or(&"processing")
            );

            match delays.next() {
                Some(delay) if started.elapsed() + delay <= self.poll_timeout => {
                    tokio::time::sleep(delay).await
                }
                _ => {
                    return Err(Error::PollTimeout {
                        attempts,
                        elapsed: started.elapsed(),
                    })
                }
            }
        }
    }

    /// Runs a whole conversion for one video.
    pub async fn run(&self, video_id: &str, format: Format) -> Result<Resolution, Error> {
        let mut session = ConversionSession::new(video_id, format);

        let convert_url = self.initialize().await?;
        session.convert_url = Some(convert_url.clone());

        session.enter(State::Converting);
        let converted = self.convert(&convert_url, video_id, format).await?;
        if let Some(title) = &converted.title {
            info!("Title: {}", title);
        }
        session.progress_url = converted.progress_url;
        session.download_url = Some(converted.download_url);
        session.title = converted.title;

        if let (Some(progress_url), Some(download_url)) =
            (session.progress_url.clone(), session.download_url.clone())
        {
            session.enter(State::Polling);
            session.download_url = Some(self.poll_progress(&progress_url, &download_url).await?);
        }

        session.enter(State::Resolved);
        session.resolution().ok_or_else(|| Error::MalformedResponse {
            phase: Phase::Convert,
            reason: "missing downloadURL".into(),
        })
    }
}
