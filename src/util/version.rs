pub const APP_NAME: &str = "Fret Emissions";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_TAG: Option<&str> = option_env!("GIT_TAG");

/// Release tag when built from a tagged checkout, crate version otherwise.
pub fn version_label() -> String {
    if let Some(tag) = GIT_TAG {
        tag.to_string()
    } else {
        format!("v{}", APP_VERSION)
    }
}

/// User agent sent to the routing service.
pub fn user_agent() -> String {
    format!("fret-emissions/{}", version_label().trim_start_matches(['v', 'V']))
}
