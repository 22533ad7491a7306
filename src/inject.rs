use crate::settings::SettingsData;
use crate::tracking::{EmitDecision, PageRenderContext, TrackingCodeResolver};
use kuchiki::NodeRef;
use kuchiki::traits::*;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("html manipulation failed: {0}")]
    Html(String),
}

/// Resolves the tracking decision for a page and appends the snippet to its head.
///
/// Tracking never breaks a render: if the document cannot be manipulated the
/// original markup is returned untouched.
pub fn render_page(html: String, ctx: &PageRenderContext, settings: &SettingsData) -> String {
    let resolver = TrackingCodeResolver::new(settings, settings);
    let decision = resolver.resolve(ctx);
    debug!(
        site = ctx.current_site_slug.as_deref().unwrap_or("-"),
        authenticated = ctx.is_authenticated,
        ?decision,
        "resolved tracking decision"
    );
    let EmitDecision::Emit(code) = decision else {
        return html;
    };
    let snippet = crate::tracking::render_snippet(&code);
    match append_to_head(&html, &snippet) {
        Ok(rendered) => rendered,
        Err(err) => {
            warn!(?err, %code, "failed to inject tracking snippet");
            html
        }
    }
}

static HEAD_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</head\s*>").expect("valid regex"));

/// Inserts `markup` verbatim before the first `</head>`. Documents without one
/// are parsed and re-serialized with the markup appended to the implied head.
pub fn append_to_head(html: &str, markup: &str) -> Result<String, InjectError> {
    if let Some(close) = HEAD_CLOSE.find(html) {
        let mut out = String::with_capacity(html.len() + markup.len());
        out.push_str(&html[..close.start()]);
        out.push_str(markup);
        out.push_str(&html[close.start()..]);
        return Ok(out);
    }
    debug!("page has no closing head tag; rebuilding document");
    let document = kuchiki::parse_html().one(html);
    let head = document
        .select_first("head")
        .map_err(|_| InjectError::Html("document has no head".to_string()))?;
    for child in parse_head_children(markup)? {
        head.as_node().append(child);
    }
    Ok(document.to_string())
}

fn parse_head_children(markup: &str) -> Result<Vec<NodeRef>, InjectError> {
    let wrapper = format!("<html><head>{markup}</head><body></body></html>");
    let fragment_doc = kuchiki::parse_html().one(wrapper);
    let head = fragment_doc
        .select_first("head")
        .map_err(|_| InjectError::Html("select fragment head failed".to_string()))?;
    Ok(head.as_node().children().collect())
}
