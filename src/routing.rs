use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs;
use tracing::debug;

static SLASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/+").expect("valid regex"));
static SITE_ROUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/s/([^/]+)(?:/|$)").expect("valid regex"));

/// Built-in page used when no page file matches the request path.
pub const DEFAULT_LAYOUT: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head><body><main><h1>{title}</h1></main></body></html>\n";

pub fn normalize_route(path: &str) -> String {
    let normalized = SLASHES.replace_all(path.trim(), "/");
    let mut s = normalized.to_string();
    if !s.starts_with('/') {
        s = format!("/{s}");
    }
    s
}

/// Site slug from a `/s/{site-slug}/...` route, if the path is site-scoped.
pub fn site_slug_from_path(path: &str) -> Option<String> {
    let path = normalize_route(path);
    SITE_ROUTE
        .captures(&path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn load_page(&self, path: &str) -> anyhow::Result<Option<String>>;
}

/// Serves `{root}/{path}.html` or `{root}/{path}/index.html`.
pub struct FsPageSource {
    root: PathBuf,
}

impl FsPageSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn candidates(&self, path: &str) -> Option<Vec<PathBuf>> {
        let route = normalize_route(path);
        let rel = route.trim_matches('/');
        if rel.split('/').any(|seg| seg == ".." || seg == ".") {
            return None;
        }
        if rel.is_empty() {
            return Some(vec![self.root.join("index.html")]);
        }
        let base = self.root.join(Path::new(rel));
        Some(vec![base.with_extension("html"), base.join("index.html")])
    }
}

#[async_trait]
impl PageSource for FsPageSource {
    async fn load_page(&self, path: &str) -> anyhow::Result<Option<String>> {
        let Some(candidates) = self.candidates(path) else {
            debug!(%path, "rejected page path");
            return Ok(None);
        };
        for candidate in candidates {
            if fs::try_exists(&candidate).await.unwrap_or(false) && candidate.is_file() {
                let html = fs::read_to_string(&candidate)
                    .await
                    .with_context(|| format!("reading page {candidate:?}"))?;
                return Ok(Some(html));
            }
        }
        Ok(None)
    }
}

pub async fn load_page_or_layout(source: &dyn PageSource, path: &str) -> anyhow::Result<String> {
    if let Some(html) = source.load_page(path).await? {
        return Ok(html);
    }
    let title = site_slug_from_path(path).unwrap_or_else(|| "Home".to_string());
    Ok(DEFAULT_LAYOUT.replace("{title}", &title))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_site_slug() {
        assert_eq!(site_slug_from_path("/s/blog").as_deref(), Some("blog"));
        assert_eq!(site_slug_from_path("/s/blog/item/3").as_deref(), Some("blog"));
        assert_eq!(site_slug_from_path("//s//blog/").as_deref(), Some("blog"));
        assert_eq!(site_slug_from_path("/"), None);
        assert_eq!(site_slug_from_path("/admin/s/blog"), None);
        assert_eq!(site_slug_from_path("/s/"), None);
    }

    #[test]
    fn normalizes_routes() {
        assert_eq!(normalize_route("s//blog"), "/s/blog");
        assert_eq!(normalize_route(""), "/");
    }

    #[tokio::test]
    async fn fs_source_prefers_files_and_falls_back_to_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("s").join("blog")).unwrap();
        std::fs::write(
            dir.path().join("s").join("blog").join("index.html"),
            "<html><head></head><body>blog</body></html>",
        )
        .unwrap();
        let source = FsPageSource::new(dir.path().to_path_buf());

        let blog = load_page_or_layout(&source, "/s/blog").await.unwrap();
        assert!(blog.contains("<body>blog</body>"));

        let shop = load_page_or_layout(&source, "/s/shop/about").await.unwrap();
        assert!(shop.contains("<title>shop</title>"));

        assert!(source.load_page("/../secret").await.unwrap().is_none());
    }
}
