use std::sync::LazyLock;

use regex::Regex;

// Each captures an 11 character id not followed by another id character
#[allow(clippy::expect_used)]
static LINK_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        r"youtu\.be/([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)",
        r"youtube\.com/shorts/([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)",
        r"youtube\.com/.*[?&]v=([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)",
    ]
    .map(|p| Regex::new(p).expect("video link regex is valid"))
});

/// Pulls the 11 character video id out of a `youtu.be/ID`,
/// `youtube.com/watch?v=ID` or `youtube.com/shorts/ID` link.
pub fn extract_video_id(url: &str) -> Option<&str> {
    LINK_PATTERNS
        .iter()
        .find_map(|re| re.captures(url)?.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDS: [&str; 4] = ["dQw4w9WgXcQ", "a-b_c-d_e-f", "___________", "0123456789Z"];

    #[test]
    fn recognised_shapes() {
        for id in IDS {
            let urls = [
                format!("https://youtu.be/{}", id),
                format!("https://youtu.be/{}?si=abcdef&t=42", id),
                format!("https://www.youtube.com/watch?v={}", id),
                format!("https://m.youtube.com/watch?feature=share&v={}&t=10s", id),
                format!("https://music.youtube.com/watch?v={}&list=RDAMVM", id),
                format!("https://www.youtube.com/shorts/{}", id),
                format!("youtube.com/shorts/{}?feature=share", id),
            ];
            for url in &urls {
                assert_eq!(extract_video_id(url), Some(id), "{}", url);
            }
        }
    }

    #[test]
    fn unrecognised() {
        for url in [
            "",
            "not a url",
            "https://vimeo.com/123456789012",
            "https://www.youtube.com/",
            "https://www.youtube.com/watch?v=short",
            "https://www.youtube.com/watch?v=dQw4w9WgXcQQ",
            "https://www.youtube.com/channel/UCuAXFkgsw1L7xaCfnd5JJOw",
            "https://youtu.be/",
            "https://example.com/watch?v=dQw4w9WgXcQ",
        ] {
            assert_eq!(extract_video_id(url), None, "{}", url);
        }
    }
}
