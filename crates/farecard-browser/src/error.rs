use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("navigation failed: {0}")]
    NavigationError(String),

    #[error("selector not found: {0}")]
    SelectorNotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("script evaluation failed: {0}")]
    ScriptError(String),

    #[error("browser already shut down")]
    LaneClosed,
}

impl BrowserError {
    /// Whether retrying the same step from scratch can help.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrowserError::Timeout(_)
                | BrowserError::SelectorNotFound(_)
                | BrowserError::NavigationError(_)
                | BrowserError::ChromiumError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrowserError::NavigationError("page not found".to_string());
        assert_eq!(err.to_string(), "navigation failed: page not found");
    }

    #[test]
    fn test_transient_classification() {
        assert!(BrowserError::Timeout("load".to_string()).is_transient());
        assert!(BrowserError::SelectorNotFound("#x".to_string()).is_transient());
        assert!(!BrowserError::LaneClosed.is_transient());
        assert!(!BrowserError::ScriptError("bad".to_string()).is_transient());
    }
}
