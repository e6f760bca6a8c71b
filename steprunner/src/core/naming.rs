//! Terminal session naming.

/// Fallback used when a project name sanitizes to nothing.
const FALLBACK_NAME: &str = "session";

/// Derive a reproducible session name from a project identifier and a
/// time-derived six digit suffix.
///
/// Not unique: two runs of the same project in the same second collide.
pub fn derive_session_name(project: &str, unix_secs: u64) -> String {
    format!(
        "{}-{:06}",
        sanitize_session_name(project),
        unix_secs % 1_000_000
    )
}

/// Name of the secondary session dedicated to a long-running service.
pub fn service_session_name(primary: &str, suffix: Option<&str>) -> String {
    let suffix = suffix
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("service");
    format!("{}-{}", primary, sanitize_session_name(suffix))
}

/// Replace characters tmux treats specially in target names (`.` and `:`
/// among others) so the name can be used verbatim with `-t`.
pub fn sanitize_session_name(raw: &str) -> String {
    let mapped: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = mapped.trim_matches('-');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_name_uses_six_digit_suffix() {
        assert_eq!(derive_session_name("shop", 1_700_000_042), "shop-000042");
        assert_eq!(derive_session_name("shop", 5), "shop-000005");
    }

    #[test]
    fn sanitizes_tmux_separators() {
        assert_eq!(sanitize_session_name("my.app:v2"), "my-app-v2");
        assert_eq!(sanitize_session_name("..."), "session");
    }

    #[test]
    fn service_name_defaults_suffix() {
        assert_eq!(service_session_name("shop-000042", None), "shop-000042-service");
        assert_eq!(
            service_session_name("shop-000042", Some("dev server")),
            "shop-000042-dev-server"
        );
    }
}
