use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)]
static SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>(.*?)</script\s*>").expect("script regex is valid")
});

/// Returns the body of the first inline `<script>` that both declares the
/// config object and defines properties on it.
pub fn find_config_script<'a>(html: &'a str, object_name: &str) -> Option<&'a str> {
    // The name is escaped, so these always compile
    let name = regex::escape(object_name);
    let declaration = Regex::new(&format!(r"\bvar\s+{}\b", name)).ok()?;
    let define = Regex::new(&format!(r"Object\s*\.\s*defineProperty\s*\(\s*{}\b", name)).ok()?;

    let found = SCRIPT
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|body| declaration.is_match(body) && define.is_match(body));
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_matching_script() {
        let html = r#"<html><head>
<script src="/app.js"></script>
<script>var other = 1; Object.defineProperty(gC, "x", {value: 1});</script>
<script type="text/javascript">
  var gC = {}; Object.defineProperty( gC , "a", {value: 1});
</script>
<SCRIPT>var gC={};Object.defineProperty(gC,"b",{value:2});</SCRIPT>
</head></html>"#;

        let body = find_config_script(html, "gC").expect("Could not find script");
        assert!(body.contains(r#""a""#));
    }

    #[test]
    fn missing_markers() {
        // Declaration without property definitions
        assert!(find_config_script("<script>var gC = {a: 1};</script>", "gC").is_none());
        // Similar names do not count
        assert!(find_config_script(
            "<script>var gCx = {}; Object.defineProperty(gCx, 'a', {value: 1});</script>",
            "gC"
        )
        .is_none());
        assert!(find_config_script("<p>no scripts</p>", "gC").is_none());
    }

    #[test]
    fn other_object_name() {
        let html = "<script>var $cfg = {}; Object.defineProperty($cfg, 'k', {value: 1});</script>";
        assert!(find_config_script(html, "$cfg").is_some());
    }
}
