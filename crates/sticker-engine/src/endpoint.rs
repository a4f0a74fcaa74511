const COMPLETIONS_PATH: &str = "/chat/completions";
const VERSION_SEGMENT: &str = "/v1";

/// Turns a user-supplied API base into the chat-completions endpoint.
///
/// Accepts a bare host, a `/v1` base, or the full completions URL.
pub fn normalize_completions_url(raw: &str) -> String {
    let base = raw.trim().trim_end_matches('/');
    if base.ends_with(COMPLETIONS_PATH) {
        base.to_string()
    } else if base.ends_with(VERSION_SEGMENT) {
        format!("{base}{COMPLETIONS_PATH}")
    } else {
        format!("{base}{VERSION_SEGMENT}{COMPLETIONS_PATH}")
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_completions_url;

    #[test]
    fn version_base_gets_completions_path() {
        assert_eq!(
            normalize_completions_url("http://h/v1"),
            "http://h/v1/chat/completions"
        );
    }

    #[test]
    fn bare_host_gets_version_and_completions_path() {
        assert_eq!(
            normalize_completions_url("http://h/"),
            "http://h/v1/chat/completions"
        );
        assert_eq!(
            normalize_completions_url("  https://proxy.example/openai///  "),
            "https://proxy.example/openai/v1/chat/completions"
        );
    }

    #[test]
    fn full_completions_url_is_unchanged() {
        assert_eq!(
            normalize_completions_url("http://h/v1/chat/completions"),
            "http://h/v1/chat/completions"
        );
        assert_eq!(
            normalize_completions_url("http://h/api/chat/completions/"),
            "http://h/api/chat/completions"
        );
    }
}
