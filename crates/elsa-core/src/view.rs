//! Seams to the presentation layer.

use thiserror::Error;

use crate::response::ResultBinding;

/// The single user-visible notification channel.
pub trait Notifier {
    fn notify(&mut self, message: &str);
}

/// Collects messages; used by tests and batch tooling.
impl Notifier for Vec<String> {
    fn notify(&mut self, message: &str) {
        self.push(message.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("render failed: {0}")]
pub struct RenderError(pub String);

/// Draws a bound result into a tab.
pub trait ResultRenderer {
    fn render(&mut self, label: &str, binding: &ResultBinding) -> Result<(), RenderError>;
}
