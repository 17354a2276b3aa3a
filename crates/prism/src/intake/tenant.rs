//! Tenant resolution from the recipient address of inbound e-mail.

use std::sync::LazyLock;

use regex::Regex;

/// `<tenant>@reports.<domain>`
static SUBDOMAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([a-z0-9][a-z0-9_-]*)@reports\.").unwrap());

/// `reports+<tenant>@<domain>`
static PLUS_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^reports\+([a-z0-9][a-z0-9_-]*)@").unwrap());

/// `reports-<tenant>@<domain>`
static DASH_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^reports-([a-z0-9][a-z0-9_-]*)@").unwrap());

/// Pulls the bare address out of `Name <addr>` or `<addr>`.
pub fn bare_address(raw: &str) -> &str {
    let raw = raw.trim();
    match (raw.rfind('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => raw[start + 1..end].trim(),
        _ => raw,
    }
}

/// Resolves the tenant for a `to` header, which may list several recipients.
///
/// Patterns are tried in order (subdomain, plus address, dash address) across
/// every recipient before falling back to `default_tenant`.
pub fn resolve_tenant(to: &str, default_tenant: &str) -> String {
    let addresses: Vec<&str> = to
        .split(',')
        .map(bare_address)
        .filter(|a| !a.is_empty())
        .collect();

    for pattern in [&*SUBDOMAIN, &*PLUS_ADDRESS, &*DASH_ADDRESS] {
        for address in &addresses {
            if let Some(caps) = pattern.captures(address) {
                return caps[1].to_ascii_lowercase();
            }
        }
    }
    default_tenant.to_string()
}
