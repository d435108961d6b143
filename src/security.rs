/// HTML escaping used for auto-escaped output and the escape filters
pub struct HtmlEscaper;

impl HtmlEscaper {
    /// Escape HTML special characters `&<>` and both quote styles
    pub fn escape(input: &str) -> String {
        let mut out = String::with_capacity(input.len() + input.len() / 8);
        for ch in input.chars() {
            match ch {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#039;"),
                _ => out.push(ch),
            }
        }
        out
    }

    /// Reverse of [`HtmlEscaper::escape`]
    pub fn unescape(input: &str) -> String {
        // &amp; last so "&amp;lt;" becomes "&lt;" and not "<"
        input
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#039;", "'")
            .replace("&#x27;", "'")
            .replace("&amp;", "&")
    }
}
