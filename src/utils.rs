use reqwest::Url;
use std::path::PathBuf;

// timestamp stored in every offer
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
// timestamp embedded in the snapshot file name
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H_%M";
pub const DEFAULT_KEYWORD: &str = "python";
pub const DEFAULT_LOG_LEVEL: &str = "info";

lazy_static! {
    pub static ref DATA_PATH: PathBuf = {
        let dir = match std::env::var("DATA_PATH") {
            Ok(d) if !d.trim().is_empty() => d,
            _ => "data".into(),
        };
        PathBuf::from(dir)
    };
}

/// Resolves `url` against `base_url` and drops the fragment.
///
/// Returns `None` for values that are neither absolute URLs nor paths
/// (`mailto:` links are absolute and kept as-is).
pub fn normalize_url(base_url: &str, url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    match Url::parse(url) {
        Ok(mut new_url) => {
            new_url.set_fragment(None);
            Some(new_url.to_string())
        }
        Err(_e) => {
            let base = Url::parse(base_url).ok()?;
            if url.starts_with('/') || url.starts_with('?') || url.starts_with("./") {
                let mut u = base.join(url).ok()?;
                u.set_fragment(None);
                Some(u.to_string())
            } else {
                None
            }
        }
    }
}

/// Collapses runs of whitespace (including newlines) into single spaces.
pub fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn remove_path_fragments() {
        assert_eq!(
            normalize_url("https://example.com", "https://example.com#hello").unwrap(),
            "https://example.com/"
        );
        assert_eq!(
            normalize_url("https://example.com", "/hello#test").unwrap(),
            "https://example.com/hello"
        );
    }

    #[test]
    fn relative_paths_need_a_leading_slash() {
        assert_eq!(normalize_url("https://example.com", "hello"), None);
        assert_eq!(normalize_url("https://example.com", "   "), None);
        assert_eq!(
            normalize_url("https://mx.computrabajo.com", "/ofertas-de-trabajo/oferta-1#lc=x").unwrap(),
            "https://mx.computrabajo.com/ofertas-de-trabajo/oferta-1"
        );
    }

    #[test]
    fn squashes_whitespace() {
        assert_eq!(squash_whitespace("  Python\n\n   Developer \t Sr "), "Python Developer Sr");
    }
}
