use ammonia;

/// Clean user-supplied text using the ammonia library.
///
/// Whitelist-based sanitization: safe tags survive, <script>/<iframe> and
/// event-handler attributes are stripped. Applied to message content, review
/// comments and profile bios before they are stored, as a fail-safe against
/// stored XSS in whatever client renders them.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_tags() {
        let cleaned = clean_html("hello <script>alert(1)</script>world");
        assert!(!cleaned.contains("script"));
        assert!(cleaned.contains("hello"));
    }
}
