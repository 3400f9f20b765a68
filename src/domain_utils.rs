/// Address and domain hierarchy helpers
pub struct DomainUtils;

impl DomainUtils {
    /// Extract domain from email address
    pub fn extract_domain(email: &str) -> Option<String> {
        email
            .rsplit_once('@')
            .map(|(_, domain)| Self::canonicalize_domain(domain.trim_end_matches('>')))
            .filter(|domain| !domain.is_empty())
    }

    /// Local part (before the `@`) of an address
    pub fn local_part(email: &str) -> Option<String> {
        email
            .rsplit_once('@')
            .map(|(local, _)| local.trim().trim_start_matches('<').to_lowercase())
            .filter(|local| !local.is_empty())
    }

    /// Canonicalize domain (lowercase, no trailing dot, no www prefix)
    pub fn canonicalize_domain(domain: &str) -> String {
        let domain_lower = domain.trim().trim_end_matches('.').to_lowercase();
        if let Some(stripped) = domain_lower.strip_prefix("www.") {
            stripped.to_string()
        } else {
            domain_lower
        }
    }

    /// The domain itself followed by every parent domain.
    /// `a.b.example.com` yields `a.b.example.com`, `b.example.com`, `example.com`, `com`.
    pub fn suffixes(domain: &str) -> impl Iterator<Item = &str> {
        std::iter::successors(Some(domain), |d| d.split_once('.').map(|(_, rest)| rest))
            .filter(|d| !d.is_empty())
    }

    /// Address from a header value such as `"Name" <user@host>` or a bare address
    pub fn parse_address(header: &str) -> Option<String> {
        let header = header.trim();
        if let (Some(start), Some(end)) = (header.rfind('<'), header.rfind('>')) {
            if start < end {
                let inner = header[start + 1..end].trim();
                if inner.contains('@') {
                    return Some(inner.to_lowercase());
                }
            }
        }

        header
            .split_whitespace()
            .find(|token| token.contains('@'))
            .map(|token| {
                token
                    .trim_matches(|c: char| matches!(c, '<' | '>' | '"' | '\'' | ',' | ';'))
                    .to_lowercase()
            })
            .filter(|addr| addr.len() > 2)
    }

    /// Display name portion of a header value, if there is one. A name that
    /// is itself an address does not count; `Acme @ Workday` does.
    pub fn display_name(header: &str) -> Option<String> {
        let lt_pos = header.find('<')?;
        let name = header[..lt_pos].trim().trim_matches('"').trim();
        let is_address = name.contains('@') && !name.contains(char::is_whitespace);
        if name.is_empty() || is_address {
            None
        } else {
            Some(name.to_string())
        }
    }
}
