use std::{str::FromStr, time::Duration};

pub const DEFAULT_PAGE_URL: &str = "https://ytmp3.as/AOPR/";
pub const DEFAULT_INIT_URL: &str = "https://gamma.gammacloud.net/api/v1/init";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 18_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.5 Mobile/15E148 Safari/604.1";

/// Endpoints, bounds and intervals used by the converter.
#[derive(Debug, Clone)]
pub struct Options {
    /// Page that ships the obfuscated config script.
    pub page_url: String,
    pub init_url: String,
    /// Name of the config object declared in the page script.
    pub config_object: String,
    pub config_ttl: Duration,
    pub max_page_redirects: usize,
    pub max_convert_redirects: usize,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    pub max_poll_attempts: u32,
    pub max_media_redirects: usize,
    pub origin: String,
    pub referer: String,
    pub user_agent: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            page_url: DEFAULT_PAGE_URL.into(),
            init_url: DEFAULT_INIT_URL.into(),
            config_object: "gC".into(),
            config_ttl: Duration::from_secs(60 * 60),
            max_page_redirects: 10,
            max_convert_redirects: 5,
            poll_interval: Duration::from_secs(3),
            poll_timeout: Duration::from_secs(5 * 60),
            max_poll_attempts: 100,
            max_media_redirects: 10,
            origin: "https://ytmp3.as".into(),
            referer: "https://ytmp3.as/".into(),
            user_agent: DEFAULT_USER_AGENT.into(),
        }
    }
}

impl Options {
    /// Defaults overridden by `YTCONV_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut opts = Self::default();

        if let Some(v) = lookup("YTCONV_PAGE_URL") {
            opts.page_url = v;
        }
        if let Some(v) = lookup("YTCONV_INIT_URL") {
            opts.init_url = v;
        }
        if let Some(v) = lookup("YTCONV_CONFIG_OBJECT") {
            opts.config_object = v;
        }
        if let Some(v) = lookup("YTCONV_USER_AGENT") {
            opts.user_agent = v;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "YTCONV_CONFIG_TTL_SECS") {
            opts.config_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "YTCONV_POLL_INTERVAL_MS") {
            opts.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "YTCONV_POLL_TIMEOUT_SECS") {
            opts.poll_timeout = Duration::from_secs(secs);
        }

        opts
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("YTCONV_PAGE_URL", "http://localhost:8080/page"),
            ("YTCONV_POLL_INTERVAL_MS", "250"),
            ("YTCONV_CONFIG_TTL_SECS", "soon"),
        ]
        .into_iter()
        .collect();
        let opts = Options::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(opts.page_url, "http://localhost:8080/page");
        assert_eq!(opts.poll_interval, Duration::from_millis(250));
        // Garbage falls back to the default
        assert_eq!(opts.config_ttl, Duration::from_secs(3600));
        assert_eq!(opts.init_url, DEFAULT_INIT_URL);
    }
}
