use serde::{Deserialize, Serialize};

/// Value that explicitly disables tracking at either settings level.
pub const DISABLED_SENTINEL: &str = "-";

/// Loader for the remote gtag.js script; the tracking code is appended as `?id=`.
pub const GTAG_LOADER_URL: &str = "https://www.googletagmanager.com/gtag/js";

/// Reads the site-scoped tracking code for the site matching a slug.
pub trait SiteCodeLookup {
    fn site_code(&self, slug: &str) -> Option<String>;
}

/// Reads the globally configured tracking code.
pub trait GlobalCodeProvider {
    fn global_code(&self) -> Option<String>;
}

/// Everything the resolver needs to know about the page being rendered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageRenderContext {
    pub is_authenticated: bool,
    pub current_site_slug: Option<String>,
}

#[cfg(test)]
impl PageRenderContext {
    pub fn anonymous(site_slug: Option<&str>) -> Self {
        Self {
            is_authenticated: false,
            current_site_slug: site_slug.map(|s| s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "code", rename_all = "snake_case")]
pub enum EmitDecision {
    Suppress,
    Emit(String),
}

impl EmitDecision {
    pub fn code(&self) -> Option<&str> {
        match self {
            EmitDecision::Emit(code) => Some(code),
            EmitDecision::Suppress => None,
        }
    }

    /// Snippet markup for this decision, if any.
    pub fn snippet(&self) -> Option<String> {
        self.code().map(render_snippet)
    }
}

/// Decides per request whether a tracking snippet is emitted and with which code.
pub struct TrackingCodeResolver<'a> {
    sites: &'a dyn SiteCodeLookup,
    global: &'a dyn GlobalCodeProvider,
}

impl<'a> TrackingCodeResolver<'a> {
    pub fn new(sites: &'a dyn SiteCodeLookup, global: &'a dyn GlobalCodeProvider) -> Self {
        Self { sites, global }
    }

    pub fn resolve(&self, ctx: &PageRenderContext) -> EmitDecision {
        // Logged-in users are never tracked.
        if ctx.is_authenticated {
            return EmitDecision::Suppress;
        }

        let site_code = ctx
            .current_site_slug
            .as_deref()
            .and_then(|slug| self.sites.site_code(slug))
            .filter(|code| !code.is_empty());

        let effective = site_code.or_else(|| self.global.global_code());

        match effective {
            Some(code) if !code.is_empty() && code != DISABLED_SENTINEL => {
                EmitDecision::Emit(code)
            }
            _ => EmitDecision::Suppress,
        }
    }
}

/// Builds the gtag.js loader plus inline initialization for `code`.
///
/// `code` is interpolated as-is. Settings storage is trusted; anyone able to
/// write a tracking code can inject script into every anonymous page.
pub fn render_snippet(code: &str) -> String {
    format!(
        r#"<script async src="{GTAG_LOADER_URL}?id={code}"></script>
<script>
    window.dataLayer = window.dataLayer || [];
    function gtag(){{dataLayer.push(arguments);}}
    gtag('js', new Date());
    gtag('config', '{code}');
</script>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeSites(HashMap<String, String>);

    impl SiteCodeLookup for FakeSites {
        fn site_code(&self, slug: &str) -> Option<String> {
            self.0.get(slug).cloned()
        }
    }

    struct FakeGlobal(Option<String>);

    impl GlobalCodeProvider for FakeGlobal {
        fn global_code(&self) -> Option<String> {
            self.0.clone()
        }
    }

    fn sites(entries: &[(&str, &str)]) -> FakeSites {
        FakeSites(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn global(code: &str) -> FakeGlobal {
        FakeGlobal(Some(code.to_string()))
    }

    #[test]
    fn authenticated_users_are_never_tracked() {
        let s = sites(&[("blog", "G-XYZ")]);
        let g = global("UA-123");
        let resolver = TrackingCodeResolver::new(&s, &g);
        for slug in [None, Some("blog"), Some("missing")] {
            let ctx = PageRenderContext {
                is_authenticated: true,
                current_site_slug: slug.map(String::from),
            };
            assert_eq!(resolver.resolve(&ctx), EmitDecision::Suppress);
        }
    }

    #[test]
    fn site_sentinel_disables_even_with_global_code() {
        let s = sites(&[("blog", "-")]);
        let g = global("UA-123");
        let resolver = TrackingCodeResolver::new(&s, &g);
        let decision = resolver.resolve(&PageRenderContext::anonymous(Some("blog")));
        assert_eq!(decision, EmitDecision::Suppress);
    }

    #[test]
    fn global_sentinel_disables() {
        let s = FakeSites::default();
        let g = global("-");
        let resolver = TrackingCodeResolver::new(&s, &g);
        assert_eq!(
            resolver.resolve(&PageRenderContext::anonymous(None)),
            EmitDecision::Suppress
        );
    }

    #[test]
    fn empty_or_absent_site_code_falls_back_to_global() {
        let g = global("UA-123");
        let empty = sites(&[("blog", "")]);
        let absent = FakeSites::default();
        for s in [&empty, &absent] {
            let resolver = TrackingCodeResolver::new(s, &g);
            assert_eq!(
                resolver.resolve(&PageRenderContext::anonymous(Some("blog"))),
                EmitDecision::Emit("UA-123".into())
            );
        }
    }

    #[test]
    fn site_code_overrides_global() {
        let s = sites(&[("blog", "G-XYZ")]);
        let g = global("UA-123");
        let resolver = TrackingCodeResolver::new(&s, &g);
        assert_eq!(
            resolver.resolve(&PageRenderContext::anonymous(Some("blog"))),
            EmitDecision::Emit("G-XYZ".into())
        );
    }

    #[test]
    fn nothing_configured_suppresses() {
        let s = FakeSites::default();
        for g in [FakeGlobal(None), global("")] {
            let resolver = TrackingCodeResolver::new(&s, &g);
            assert_eq!(
                resolver.resolve(&PageRenderContext::anonymous(Some("blog"))),
                EmitDecision::Suppress
            );
        }
    }

    #[test]
    fn zero_code_is_emitted() {
        let s = sites(&[("blog", "0")]);
        let g = global("UA-123");
        let resolver = TrackingCodeResolver::new(&s, &g);
        assert_eq!(
            resolver.resolve(&PageRenderContext::anonymous(Some("blog"))),
            EmitDecision::Emit("0".into())
        );
    }

    #[test]
    fn resolve_is_idempotent() {
        let s = sites(&[("blog", "G-XYZ")]);
        let g = global("UA-123");
        let resolver = TrackingCodeResolver::new(&s, &g);
        let ctx = PageRenderContext::anonymous(Some("blog"));
        assert_eq!(resolver.resolve(&ctx), resolver.resolve(&ctx));
    }

    #[test]
    fn snippet_references_code_twice() {
        let snippet = render_snippet("G-AAA");
        assert_eq!(snippet.matches("G-AAA").count(), 2);
        assert!(snippet.starts_with(
            "<script async src=\"https://www.googletagmanager.com/gtag/js?id=G-AAA\"></script>"
        ));
        assert!(snippet.contains("gtag('js', new Date());"));
        assert!(snippet.contains("gtag('config', 'G-AAA');"));
    }

    #[test]
    fn snippet_text_is_stable() {
        let expected = "<script async src=\"https://www.googletagmanager.com/gtag/js?id=G-1\"></script>\n\
                        <script>\n    window.dataLayer = window.dataLayer || [];\n    \
                        function gtag(){dataLayer.push(arguments);}\n    \
                        gtag('js', new Date());\n    gtag('config', 'G-1');\n</script>\n";
        assert_eq!(render_snippet("G-1"), expected);
    }

    #[test]
    fn decision_serializes_with_tag() {
        let json = serde_json::to_value(EmitDecision::Emit("G-1".into())).unwrap();
        assert_eq!(json, serde_json::json!({"decision": "emit", "code": "G-1"}));
        assert!(EmitDecision::Suppress.snippet().is_none());
    }
}
