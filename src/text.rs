use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SCRIPT_STYLE: Regex = Regex::new(r"(?is)<(script|style|head)\b.*?</(script|style|head)\s*>").unwrap();
    static ref BLOCK_BREAK: Regex =
        Regex::new(r"(?i)<\s*(?:br|/p|/div|/tr|/li|/h[1-6]|/table)\b[^>]*>").unwrap();
    static ref TAG: Regex = Regex::new(r"(?s)<[^>]*>").unwrap();
    static ref HTML_ENTITY: Regex =
        Regex::new(r"&(?:#(\d+)|#[xX]([0-9A-Fa-f]+)|([a-zA-Z][a-zA-Z0-9]*));").unwrap();
    static ref HORIZONTAL_SPACE: Regex = Regex::new(r"[ \t\u{a0}]+").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Reduces an HTML body to plain text: markup dropped, block elements turned
/// into line breaks, entities decoded, blank lines removed.
pub fn strip_html(html: &str) -> String {
    if !html.contains('<') && !html.contains('&') {
        return html.to_string();
    }

    let without_scripts = SCRIPT_STYLE.replace_all(html, " ");
    let with_breaks = BLOCK_BREAK.replace_all(&without_scripts, "\n");
    let without_tags = TAG.replace_all(&with_breaks, " ");
    let decoded = decode_html_entities(&without_tags);

    decoded
        .lines()
        .map(|line| HORIZONTAL_SPACE.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn decode_html_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    HTML_ENTITY
        .replace_all(text, |caps: &regex::Captures| {
            if let Some(decimal) = caps.get(1) {
                if let Some(ch) = decimal.as_str().parse::<u32>().ok().and_then(char::from_u32) {
                    return ch.to_string();
                }
            } else if let Some(hex) = caps.get(2) {
                if let Some(ch) = u32::from_str_radix(hex.as_str(), 16)
                    .ok()
                    .and_then(char::from_u32)
                {
                    return ch.to_string();
                }
            } else if let Some(named) = caps.get(3) {
                let replacement = match named.as_str() {
                    "amp" => Some("&"),
                    "lt" => Some("<"),
                    "gt" => Some(">"),
                    "quot" => Some("\""),
                    "apos" | "rsquo" | "lsquo" => Some("'"),
                    "nbsp" => Some(" "),
                    "ndash" => Some("-"),
                    "mdash" => Some("-"),
                    _ => None,
                };
                if let Some(replacement) = replacement {
                    return replacement.to_string();
                }
            }
            caps[0].to_string()
        })
        .into_owned()
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_html_blocks_and_entities() {
        let html = "<html><head><title>x</title></head><body><p>Your application was sent to <b>Acme&nbsp;&amp;&nbsp;Sons</b>.</p><div>Good luck!</div></body></html>";
        let text = strip_html(html);
        assert_eq!(text, "Your application was sent to Acme & Sons .\nGood luck!");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(strip_html("plain\ntext"), "plain\ntext");
    }

    #[test]
    fn test_numeric_entities() {
        assert_eq!(decode_html_entities("O&#39;Reilly &#x26; Co"), "O'Reilly & Co");
        assert_eq!(decode_html_entities("&bogus;"), "&bogus;");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  Acme \n  Corp\t"), "Acme Corp");
    }
}
