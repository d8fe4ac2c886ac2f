//! Shared User-Agent string for all collector HTTP clients.
//!
//! Single source for the UA format so every upstream sees the same,
//! version-stamped identification.

/// Product token for User-Agent identification.
const PRODUCT: &str = "demand-signals";

/// Default User-Agent for API requests.
#[must_use]
pub(crate) fn default_api_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{PRODUCT}/{version} (technology-demand-research)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_contains_crate_version() {
        let ua = default_api_user_agent();
        assert_eq!(
            env!("CARGO_PKG_VERSION"),
            ua.strip_prefix("demand-signals/")
                .and_then(|s| s.split(' ').next())
                .expect("UA has version"),
            "UA must contain crate version"
        );
    }

    #[test]
    fn test_user_agent_identifies_purpose() {
        let ua = default_api_user_agent();
        assert!(
            ua.contains("technology-demand-research"),
            "UA must identify its purpose: {ua}"
        );
    }
}
