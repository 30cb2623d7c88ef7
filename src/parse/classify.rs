use std::fmt;

use scraper::{Html, Selector};

/// Why a page was ignored without touching storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The export captured a login redirect instead of the page.
    LoginPage,
    /// A page rendered with the deprecated pre-redesign template.
    LegacyLayout,
    /// The printer-friendly variant of a topic.
    PrintVersion,
}

impl SkipReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoginPage => "login page",
            Self::LegacyLayout => "legacy layout",
            Self::PrintVersion => "print version",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A predicate that recognises one kind of non-content page.
pub trait PageRule: Send + Sync {
    /// The reason recorded when this rule matches.
    fn reason(&self) -> SkipReason;

    /// Whether the document is of this kind.
    fn matches(&self, document: &Html) -> bool;
}

/// Matches when the document contains at least one element matching a CSS selector.
pub struct SelectorRule {
    reason: SkipReason,
    selector: Selector,
}

impl SelectorRule {
    /// Build a rule from a CSS selector.
    ///
    /// # Errors
    ///
    /// Returns the selector text if it does not parse.
    pub fn new(reason: SkipReason, css: &str) -> Result<Self, String> {
        let selector = Selector::parse(css).map_err(|e| format!("invalid selector '{css}': {e}"))?;
        Ok(Self { reason, selector })
    }
}

impl PageRule for SelectorRule {
    fn reason(&self) -> SkipReason {
        self.reason
    }

    fn matches(&self, document: &Html) -> bool {
        document.select(&self.selector).next().is_some()
    }
}

/// Runs page rules in registration order before any structural parsing.
pub struct PageClassifier {
    rules: Vec<Box<dyn PageRule>>,
}

impl PageClassifier {
    /// A classifier with no rules: every page is content.
    #[must_use]
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// The rules every export page is checked against.
    #[must_use]
    pub fn standard() -> Self {
        let rules = [
            (SkipReason::LoginPage, "h2.login-title"),
            (SkipReason::PrintVersion, r#"link[href$="print.css"]"#),
            (SkipReason::LegacyLayout, "div#wrapcentre, table.tablebg"),
        ];

        let mut classifier = Self::new();
        for (reason, css) in rules {
            // The built-in selectors are static and known to parse.
            if let Ok(rule) = SelectorRule::new(reason, css) {
                classifier = classifier.with_rule(rule);
            }
        }
        classifier
    }

    /// Append a rule. Earlier rules take precedence.
    #[must_use]
    pub fn with_rule(mut self, rule: impl PageRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// The first matching rule's reason, or `None` for a content page.
    #[must_use]
    pub fn classify(&self, document: &Html) -> Option<SkipReason> {
        self.rules
            .iter()
            .find(|rule| rule.matches(document))
            .map(|rule| rule.reason())
    }
}

impl Default for PageClassifier {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_page() {
        let doc = Html::parse_document(r#"<div id="page-body"><h2 class="login-title">Login</h2></div>"#);
        assert_eq!(
            PageClassifier::standard().classify(&doc),
            Some(SkipReason::LoginPage)
        );
    }

    #[test]
    fn test_print_version() {
        let doc = Html::parse_document(
            r#"<html><head><link rel="stylesheet" href="styles/lrr/theme/print.css"></head><body></body></html>"#,
        );
        assert_eq!(
            PageClassifier::standard().classify(&doc),
            Some(SkipReason::PrintVersion)
        );
    }

    #[test]
    fn test_legacy_layout() {
        let doc = Html::parse_document(r#"<div id="wrapcentre"><table class="tablebg"></table></div>"#);
        assert_eq!(
            PageClassifier::standard().classify(&doc),
            Some(SkipReason::LegacyLayout)
        );
    }

    #[test]
    fn test_content_page_passes() {
        let doc = Html::parse_document(
            r#"<div id="page-body"><h2 class="topic-title"><a href="./viewtopic.php?f=1&amp;t=2">Hi</a></h2></div>"#,
        );
        assert_eq!(PageClassifier::standard().classify(&doc), None);
        assert_eq!(PageClassifier::new().classify(&doc), None);
    }

    #[test]
    fn test_custom_rule_order() {
        let doc = Html::parse_document(r#"<h2 class="login-title">x</h2><div class="custom"></div>"#);
        let classifier = PageClassifier::new()
            .with_rule(SelectorRule::new(SkipReason::LegacyLayout, "div.custom").unwrap())
            .with_rule(SelectorRule::new(SkipReason::LoginPage, "h2.login-title").unwrap());
        assert_eq!(classifier.classify(&doc), Some(SkipReason::LegacyLayout));
    }

    #[test]
    fn test_invalid_selector() {
        assert!(SelectorRule::new(SkipReason::LoginPage, "[[").is_err());
    }
}
