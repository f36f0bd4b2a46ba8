//! Per-request allow/block policy installed on every lane.
//!
//! The decision is a pure function of the request's URL and resource type, so
//! it can be tested without a browser. The engine translates CDP resource
//! types into [`ResourceKind`] and applies the decision.

use farecard_core::FilterConfig;
use url::Url;

/// Resource type of an outgoing request, as far as the filter cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Top-level or frame document
    Document,
    /// Stylesheet
    Stylesheet,
    /// Image
    Image,
    /// Audio/video
    Media,
    /// Web font
    Font,
    /// Script
    Script,
    /// XHR / fetch
    Xhr,
    /// Anything else
    Other,
}

/// Outcome for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Let the request through
    Allow,
    /// Fail the request as blocked by client
    Block,
}

/// Declarative request filter. Holds no per-request state.
#[derive(Debug, Clone)]
pub struct ResourceFilter {
    origin: Option<Url>,
    script_allow_list: Vec<String>,
    blocked_extensions: Vec<String>,
}

impl ResourceFilter {
    /// Build a filter for a portal served from `origin`.
    ///
    /// An unparsable origin disables the cross-origin rule rather than
    /// blocking everything.
    #[must_use]
    pub fn new(origin: &str, config: &FilterConfig) -> Self {
        Self {
            origin: Url::parse(origin).ok(),
            script_allow_list: config
                .script_allow_list
                .iter()
                .map(|s| s.to_ascii_lowercase())
                .collect(),
            blocked_extensions: config
                .blocked_extensions
                .iter()
                .map(|s| s.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Decide whether a request may proceed.
    #[must_use]
    pub fn decide(&self, url: &str, kind: ResourceKind) -> FilterDecision {
        if matches!(
            kind,
            ResourceKind::Image | ResourceKind::Media | ResourceKind::Font | ResourceKind::Stylesheet
        ) {
            return FilterDecision::Block;
        }

        let Ok(parsed) = Url::parse(url) else {
            // data:, blob: and friends parse fine; anything else is noise
            return FilterDecision::Block;
        };

        if matches!(parsed.scheme(), "data" | "blob" | "about") {
            return if kind == ResourceKind::Script {
                FilterDecision::Block
            } else {
                FilterDecision::Allow
            };
        }

        if self.has_blocked_extension(&parsed) {
            return FilterDecision::Block;
        }

        if !self.is_same_origin(&parsed) {
            return FilterDecision::Block;
        }

        if kind == ResourceKind::Script {
            let lowered = url.to_ascii_lowercase();
            if self
                .script_allow_list
                .iter()
                .any(|needle| lowered.contains(needle.as_str()))
            {
                return FilterDecision::Allow;
            }
            return FilterDecision::Block;
        }

        FilterDecision::Allow
    }

    fn has_blocked_extension(&self, url: &Url) -> bool {
        let path = url.path();
        let Some(last) = path.rsplit('/').next() else {
            return false;
        };
        match last.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_ascii_lowercase();
                self.blocked_extensions.iter().any(|b| *b == ext)
            }
            None => false,
        }
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        match &self.origin {
            Some(origin) => origin.origin() == url.origin(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> ResourceFilter {
        ResourceFilter::new("https://portal.example", &FilterConfig::default())
    }

    #[test]
    fn test_blocks_heavy_resource_types() {
        let f = filter();
        for kind in [
            ResourceKind::Image,
            ResourceKind::Media,
            ResourceKind::Font,
            ResourceKind::Stylesheet,
        ] {
            assert_eq!(
                f.decide("https://portal.example/whatever", kind),
                FilterDecision::Block
            );
        }
    }

    #[test]
    fn test_blocks_static_extensions_regardless_of_kind() {
        let f = filter();
        assert_eq!(
            f.decide("https://portal.example/img/logo.PNG", ResourceKind::Other),
            FilterDecision::Block
        );
        assert_eq!(
            f.decide("https://portal.example/site.css?v=3", ResourceKind::Xhr),
            FilterDecision::Block
        );
    }

    #[test]
    fn test_blocks_cross_origin() {
        let f = filter();
        assert_eq!(
            f.decide("https://tracker.example/collect", ResourceKind::Xhr),
            FilterDecision::Block
        );
        assert_eq!(
            f.decide("http://portal.example/frmLogin.aspx", ResourceKind::Document),
            FilterDecision::Block
        );
    }

    #[test]
    fn test_allows_same_origin_documents_and_xhr() {
        let f = filter();
        assert_eq!(
            f.decide("https://portal.example/frmLogin.aspx", ResourceKind::Document),
            FilterDecision::Allow
        );
        assert_eq!(
            f.decide("https://portal.example/api/grid", ResourceKind::Xhr),
            FilterDecision::Allow
        );
    }

    #[test]
    fn test_scripts_allow_list() {
        let f = filter();
        assert_eq!(
            f.decide(
                "https://portal.example/js/jquery.maskedinput.min.js",
                ResourceKind::Script
            ),
            FilterDecision::Allow
        );
        assert_eq!(
            f.decide(
                "https://portal.example/ScriptResource.axd?d=abc",
                ResourceKind::Script
            ),
            FilterDecision::Allow
        );
        assert_eq!(
            f.decide("https://portal.example/js/analytics.js", ResourceKind::Script),
            FilterDecision::Block
        );
    }

    #[test]
    fn test_allow_listed_script_from_other_origin_is_blocked() {
        let f = filter();
        assert_eq!(
            f.decide("https://cdn.example/jquery.js", ResourceKind::Script),
            FilterDecision::Block
        );
    }

    #[test]
    fn test_unparsable_origin_disables_cross_origin_rule() {
        let f = ResourceFilter::new("", &FilterConfig::default());
        assert_eq!(
            f.decide("https://anywhere.example/page", ResourceKind::Document),
            FilterDecision::Allow
        );
    }

    #[test]
    fn test_data_urls() {
        let f = filter();
        assert_eq!(
            f.decide("data:text/html,hello", ResourceKind::Document),
            FilterDecision::Allow
        );
        assert_eq!(
            f.decide("data:text/javascript,alert(1)", ResourceKind::Script),
            FilterDecision::Block
        );
    }
}
