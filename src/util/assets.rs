use std::borrow::Cow;

use rust_embed::RustEmbed;

/// Embed the entire `assets/` directory into the binary.
#[derive(RustEmbed)]
#[folder = "assets"]
struct EmbeddedAssets;

/// Path of the static city-pair distance table.
pub const CITY_DISTANCES: &str = "/assets/city_distances.json";

/// Returns the contents of an embedded text asset, if present and valid UTF-8.
pub fn load_text(path: &str) -> Option<String> {
    let asset = load_asset(path)?;
    String::from_utf8(asset.into_owned()).ok()
}

fn load_asset(path: &str) -> Option<Cow<'static, [u8]>> {
    let canonical = canonical_asset_path(path);
    EmbeddedAssets::get(&canonical).map(|file| file.data)
}

fn canonical_asset_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if let Some(rest) = trimmed.strip_prefix("assets/") {
        rest.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_paths_are_canonicalized() {
        assert_eq!(canonical_asset_path("/assets/a.json"), "a.json");
        assert_eq!(canonical_asset_path("assets/a.json"), "a.json");
        assert_eq!(canonical_asset_path("b.json"), "b.json");
    }

    #[test]
    fn city_table_is_embedded() {
        let raw = load_text(CITY_DISTANCES).expect("embedded distance table");
        assert!(raw.contains("\"Paris\", \"Lyon\", 463"));
        assert!(load_text("/assets/missing.json").is_none());
    }
}
