//! Unified error handling for the synchronization engine.

use crate::expr::ExprError;

/// Engine error type covering configuration, codec, and collaborator
/// failures.
///
/// Configuration and template errors are terminal for the whole run and
/// raised before any network call. Locator parse errors are typed so
/// callers can tell "no prior submission found" apart from transport
/// failures. Collaborator errors propagate untouched; retry, if any,
/// belongs to the vendor clients behind the collaborator traits.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error in `{template}`: {source}")]
    Template {
        template: String,
        #[source]
        source: ExprError,
    },

    #[error("Issue link parse error: {0}")]
    LocatorParse(String),

    #[error("Source system error: {0}")]
    Source(anyhow::Error),

    #[error("Target system error: {0}")]
    Target(anyhow::Error),

    #[error("New-issue hook error: {0}")]
    Hook(anyhow::Error),
}

impl SyncError {
    /// Wrap a template failure with the offending template text.
    pub fn template(template: &str, source: ExprError) -> Self {
        Self::Template {
            template: template.to_string(),
            source,
        }
    }

    /// Check if this error is a fatal configuration problem.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Template { .. })
    }

    /// Check if this error is a link codec parse failure.
    pub fn is_locator_parse(&self) -> bool {
        matches!(self, Self::LocatorParse(_))
    }
}
