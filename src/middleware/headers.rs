pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
img-src 'self' data: https:; connect-src 'self' https://*.supabase.co wss://*.supabase.co; frame-ancestors 'none'; \
base-uri 'self'; form-action 'self'";

pub const STRICT_TRANSPORT_SECURITY: &str = "max-age=31536000; includeSubDomains";

/// Response headers applied by the audit service and mirrored as meta tags.
pub fn security_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Content-Security-Policy", CONTENT_SECURITY_POLICY),
        ("Strict-Transport-Security", STRICT_TRANSPORT_SECURITY),
        ("X-Content-Type-Options", "nosniff"),
        ("X-Frame-Options", "DENY"),
        ("X-XSS-Protection", "1; mode=block"),
        ("Referrer-Policy", "strict-origin-when-cross-origin"),
        ("Permissions-Policy", "camera=(), microphone=(), geolocation=(self)"),
    ]
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}

/// `<meta>` equivalents of [`security_headers`], plus the CSRF token when present.
///
/// Browsers ignore HSTS and frame options delivered this way; they are rendered for
/// visibility only.
pub fn security_meta_tags(csrf_token: Option<&str>) -> Vec<String> {
    let mut tags: Vec<String> = security_headers()
        .into_iter()
        .map(|(name, value)| format!(r#"<meta http-equiv="{}" content="{}">"#, name, escape_attr(value)))
        .collect();

    if let Some(token) = csrf_token {
        tags.push(format!(r#"<meta name="csrf-token" content="{}">"#, escape_attr(token)));
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_tags_cover_every_header_and_csrf() {
        let tags = security_meta_tags(Some("abc123"));
        assert_eq!(tags.len(), security_headers().len() + 1);
        assert!(tags[0].starts_with(r#"<meta http-equiv="Content-Security-Policy" content="default-src 'self';"#));
        assert_eq!(tags.last().unwrap(), r#"<meta name="csrf-token" content="abc123">"#);
    }

    #[test]
    fn meta_tag_values_are_attribute_escaped() {
        let tags = security_meta_tags(Some(r#""><script>"#));
        assert_eq!(tags.last().unwrap(), r#"<meta name="csrf-token" content="&quot;&gt;&lt;script&gt;">"#);
    }
}
