//! Shared User-Agent string for all acquisition traffic.
//!
//! Single source for the project URL and UA format so every request this
//! crate issues stays identifiable and easy to update (good citizenship;
//! RFC 9308).

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/skyfetch";

/// Default User-Agent for acquisition requests (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("skyfetch/{version} (weather-data-collector; +{PROJECT_UA_URL})")
}
