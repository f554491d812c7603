//! Save-path generation for persisted downloads.
//!
//! Downloaded bodies land under a per-domain subdirectory of the output
//! root. The filename comes from the URL path's last segment; extensionless
//! URLs fall back to `index` plus a content-type-sniffed extension, and URLs
//! carrying a query string get a short content-stable hash appended so
//! distinct dynamic requests never collide on the same base name.

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use url::Url;

/// Hex characters of the URL hash appended to query-string filenames.
const URL_HASH_LEN: usize = 10;

/// Extensions longer than this are not real extensions (e.g. a dotted
/// product name in the last path segment).
const MAX_EXTENSION_LEN: usize = 12;

/// Derives the full save path for a URL under the output root.
///
/// Layout: `<output_dir>/<sanitized domain>/<filename>`. The domain
/// subdirectory is not created here; the client creates it on demand.
#[must_use]
pub(crate) fn save_path_for(output_dir: &Path, url: &Url, content_type: Option<&str>) -> PathBuf {
    let domain_dir = sanitize_filename(url.host_str().unwrap_or("unknown"));
    let filename = filename_for(url, content_type);
    output_dir.join(domain_dir).join(filename)
}

/// Derives a filename from the URL path, content type, and query string.
pub(crate) fn filename_for(url: &Url, content_type: Option<&str>) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(std::borrow::Cow::into_owned)
                .unwrap_or_else(|_| segment.to_string())
        });

    let base = match segment {
        Some(name) => {
            let sanitized = sanitize_filename(&name);
            if sanitized.trim_matches('_').is_empty() {
                "index".to_string()
            } else {
                sanitized
            }
        }
        None => "index".to_string(),
    };

    let (stem, extension) = match split_extension(&base) {
        Some((stem, ext)) => (stem.to_string(), ext.to_string()),
        None => (
            base,
            extension_from_content_type(content_type.unwrap_or("")).to_string(),
        ),
    };

    if url.query().is_some() {
        format!("{stem}_{}{extension}", short_url_hash(url.as_str()))
    } else {
        format!("{stem}{extension}")
    }
}

/// Splits `name.ext` into stem and `.ext`, rejecting degenerate or
/// overly long extensions.
fn split_extension(name: &str) -> Option<(&str, &str)> {
    let dot_index = name.rfind('.')?;
    let ext = &name[dot_index..];
    if ext.len() <= 1 || ext.len() > MAX_EXTENSION_LEN || dot_index == 0 {
        return None;
    }
    Some((&name[..dot_index], ext))
}

/// Guess a file extension from a Content-Type header.
///
/// Unknown types get `.dat` — the client stores whatever the server sent.
pub(crate) fn extension_from_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "text/html" => ".html",
        "text/plain" => ".txt",
        "text/csv" => ".csv",
        "application/json" => ".json",
        "application/xml" | "text/xml" => ".xml",
        "application/pdf" => ".pdf",
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "application/zip" => ".zip",
        "application/gzip" => ".gz",
        "application/x-netcdf" => ".nc",
        "application/octet-stream" => ".dat",
        _ => ".dat",
    }
}

/// Short content-stable hash of a URL, for query-string disambiguation.
pub(crate) fn short_url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex: String = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    hex[..URL_HASH_LEN].to_string()
}

/// Sanitizes a filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |`) and control characters, and rewrites dot-only
/// segments so a hostile URL cannot traverse out of the output directory.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    // ==================== filename_for ====================

    #[test]
    fn test_filename_from_last_segment() {
        let url = parse("https://model.example.com/runs/surface.grib2");
        assert_eq!(filename_for(&url, None), "surface.grib2");
    }

    #[test]
    fn test_filename_percent_decoded() {
        let url = parse("https://example.com/tide%20table.csv");
        assert_eq!(filename_for(&url, None), "tide table.csv");
    }

    #[test]
    fn test_filename_root_path_uses_index_and_content_type() {
        let url = parse("https://tides.example.org/");
        assert_eq!(filename_for(&url, Some("text/html")), "index.html");
    }

    #[test]
    fn test_filename_extensionless_segment_sniffs_content_type() {
        let url = parse("https://api.example.com/v1/observations");
        assert_eq!(
            filename_for(&url, Some("application/json")),
            "observations.json"
        );
    }

    #[test]
    fn test_filename_unknown_content_type_gets_dat() {
        let url = parse("https://example.com/feed");
        assert_eq!(filename_for(&url, None), "feed.dat");
    }

    #[test]
    fn test_filename_query_appends_stable_hash() {
        let url_a = parse("https://api.example.com/obs.json?station=44013");
        let url_b = parse("https://api.example.com/obs.json?station=46042");

        let name_a = filename_for(&url_a, None);
        let name_b = filename_for(&url_b, None);

        assert_ne!(name_a, name_b, "distinct queries must not collide");
        assert!(name_a.starts_with("obs_"));
        assert!(name_a.ends_with(".json"));

        // Same URL, same name
        assert_eq!(filename_for(&url_a, None), name_a);
    }

    #[test]
    fn test_filename_overlong_extension_treated_as_plain_name() {
        let url = parse("https://example.com/wx.forecast-bundle");
        // ".forecast-bundle" exceeds the extension length cap
        assert_eq!(filename_for(&url, Some("text/csv")), "wx.forecast-bundle.csv");
    }

    // ==================== save_path_for ====================

    #[test]
    fn test_save_path_uses_domain_subdirectory() {
        let url = parse("https://model.example.com/surface.grib2");
        let path = save_path_for(Path::new("/data"), &url, None);
        assert_eq!(
            path,
            Path::new("/data/model.example.com/surface.grib2")
        );
    }

    #[test]
    fn test_save_path_stays_under_output_dir_for_hostile_url() {
        let url = parse("https://example.com/..%2f..%2fetc%2fpasswd");
        let base = Path::new("/data");
        let path = save_path_for(base, &url, None);
        assert!(path.starts_with(base), "got {}", path.display());
        assert!(
            !path.components().any(|c| c == Component::ParentDir),
            "no .. components allowed: {}",
            path.display()
        );
    }

    // ==================== helpers ====================

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("a/b:c*d.csv"), "a_b_c_d.csv");
        assert_eq!(sanitize_filename("x|y<z>.txt"), "x_y_z_.txt");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_sanitize_filename_preserves_valid_chars() {
        assert_eq!(sanitize_filename("tide-table_44013.csv"), "tide-table_44013.csv");
    }

    #[test]
    fn test_short_url_hash_is_stable_and_short() {
        let a = short_url_hash("https://example.com/a?x=1");
        let b = short_url_hash("https://example.com/a?x=1");
        let c = short_url_hash("https://example.com/a?x=2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), URL_HASH_LEN);
    }

    #[test]
    fn test_extension_from_content_type_strips_parameters() {
        assert_eq!(
            extension_from_content_type("application/json; charset=utf-8"),
            ".json"
        );
    }

    #[test]
    fn test_extension_from_content_type_unknown_is_dat() {
        assert_eq!(extension_from_content_type("application/wmo-grib2"), ".dat");
        assert_eq!(extension_from_content_type(""), ".dat");
    }

    #[test]
    fn test_split_extension_rules() {
        assert_eq!(split_extension("a.json"), Some(("a", ".json")));
        assert_eq!(split_extension("noext"), None);
        assert_eq!(split_extension(".hidden"), None);
        assert_eq!(split_extension("trailing."), None);
    }
}
