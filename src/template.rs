//! Placeholder expansion for tenant message and subject templates.
//!
//! Templates reference tenant data with `{client.field}` and
//! `{targeting.field}` placeholders. Unknown placeholders are preserved
//! verbatim so malformed templates fail visibly rather than silently.

use crate::config::TenantConfig;
use regex::Regex;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-zA-Z0-9_.]+)\}").expect("invalid regex"));

/// Expand `{client.x}` / `{targeting.y}` placeholders against the tenant
/// config. Values are looked up on the serialized form so every configured
/// field is addressable without per-field plumbing.
pub fn expand_placeholders(template: &str, tenant: &TenantConfig) -> String {
    let client = serde_json::to_value(&tenant.client).unwrap_or_default();
    let targeting = serde_json::to_value(&tenant.targeting).unwrap_or_default();

    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            let mut parts = key.splitn(2, '.');
            let (table, field) = (parts.next().unwrap_or(""), parts.next().unwrap_or(""));
            let source = match table {
                "client" => &client,
                "targeting" => &targeting,
                _ => return caps[0].to_string(),
            };
            match source.get(field) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                Some(serde_json::Value::Bool(b)) => b.to_string(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenantConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expands_client_and_targeting_fields() {
        let tenant = TenantConfig::sample();
        let out = expand_placeholders("{client.company_name}様 {targeting.subject}", &tenant);
        assert_eq!(out, format!("{}様 {}", tenant.client.company_name, tenant.targeting.subject));
    }

    #[test]
    fn test_unknown_placeholder_is_preserved() {
        let tenant = TenantConfig::sample();
        let out = expand_placeholders("hello {client.no_such_field} {oops}", &tenant);
        assert_eq!(out, "hello {client.no_such_field} {oops}");
    }
}
