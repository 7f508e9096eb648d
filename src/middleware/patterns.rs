//! Signature screens for request bodies.
//!
//! These are pattern matches over the serialized body: they catch careless payloads,
//! are easy to bypass, and will occasionally flag legitimate text.

use crate::models::security::{SecurityViolation, ViolationSeverity, ViolationType};
use regex::{Regex, RegexBuilder};
use serde_json::json;
use std::sync::LazyLock;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .unwrap_or_else(|e| panic!("invalid built-in pattern {pattern}: {e}"))
        })
        .collect()
}

static XSS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"<script[^>]*>[\s\S]*?</script\s*>",
        r"javascript\s*:",
        r"<[^>]*\bon[a-z]+\s*=",
        r"<iframe[^>]*>",
        r"\beval\s*\(",
        r"expression\s*\(",
    ])
});

static SQL_INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\bunion\s+(all\s+)?select\b",
        r"\bor\b\s+(\d+\s*=\s*\d+|'[^']*'\s*=\s*')",
        r"'\s*;\s*(drop|delete|insert|update|alter|truncate)\b",
        r"\bdrop\s+(table|database)\b",
        r"('\s*--|/\*[\s\S]*?\*/)",
        r"\bexec(ute)?\s+(xp_|sp_)\w+",
    ])
});

static SUSPICIOUS_AGENTS: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"(curl|wget|python-requests|sqlmap|nikto|nmap|masscan)")
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| panic!("invalid user agent pattern: {e}"))
});

fn first_match<'a>(patterns: &'a [Regex], body: &str) -> Option<&'a Regex> {
    patterns.iter().find(|pattern| pattern.is_match(body))
}

pub fn detect_xss_attempt(body: &str) -> Option<SecurityViolation> {
    first_match(&XSS_PATTERNS, body).map(|pattern| {
        SecurityViolation::new(ViolationType::Xss, ViolationSeverity::High, "Potential XSS payload detected", true)
            .with_details(json!({ "pattern": pattern.as_str() }))
    })
}

pub fn detect_sql_injection(body: &str) -> Option<SecurityViolation> {
    first_match(&SQL_INJECTION_PATTERNS, body).map(|pattern| {
        SecurityViolation::new(
            ViolationType::SqlInjection,
            ViolationSeverity::Critical,
            "Potential SQL injection detected",
            true,
        )
        .with_details(json!({ "pattern": pattern.as_str() }))
    })
}

/// Advisory only: flags missing, truncated or tool-like user agents.
pub fn check_user_agent(user_agent: Option<&str>) -> Option<SecurityViolation> {
    let reason = match user_agent.map(str::trim) {
        None | Some("") => "missing user agent",
        Some(ua) if ua.len() < 10 => "user agent too short",
        Some(ua) if SUSPICIOUS_AGENTS.is_match(ua) => "automated client user agent",
        Some(_) => return None,
    };

    Some(
        SecurityViolation::new(ViolationType::SuspiciousUserAgent, ViolationSeverity::Low, reason, false)
            .with_details(json!({ "userAgent": user_agent })),
    )
}

pub fn check_payload_size(size: usize, max: usize) -> Option<SecurityViolation> {
    (size > max).then(|| {
        SecurityViolation::new(ViolationType::PayloadTooLarge, ViolationSeverity::Medium, "Request payload too large", true)
            .with_details(json!({ "size": size, "max": max }))
    })
}

/// HTML-escape user supplied text.
pub fn sanitize_input(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}
