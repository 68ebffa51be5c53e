//! The seam between the sequencer and whatever renders the editor.
//!
//! Nothing here holds a live DOM node. An [`ElementRef`] is a recipe
//! (selector path plus match index) and every call re-runs it against the
//! page as it is right now. The editor re-renders freely, so a reference
//! that resolved a moment ago may resolve to nothing, or to a different
//! node, on the next call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Decoration;
use crate::types::ImagePayload;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathStep {
    pub selector: String,
    pub index: usize,
}

/// How to find an element: `querySelectorAll(step.selector)[step.index]`,
/// applied from the document downwards, one step per nesting level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    path: Vec<PathStep>,
}

impl ElementRef {
    pub fn nth(selector: impl Into<String>, index: usize) -> Self {
        Self {
            path: vec![PathStep {
                selector: selector.into(),
                index,
            }],
        }
    }

    pub fn first(selector: impl Into<String>) -> Self {
        Self::nth(selector, 0)
    }

    /// The `index`-th match of `selector` inside this element.
    pub fn child(&self, selector: impl Into<String>, index: usize) -> Self {
        let mut path = self.path.clone();
        path.push(PathStep {
            selector: selector.into(),
            index,
        });
        Self { path }
    }

    pub fn path(&self) -> &[PathStep] {
        &self.path
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.path.iter().enumerate() {
            if i > 0 {
                f.write_str(" > ")?;
            }
            write!(f, "{}[{}]", step.selector, step.index)?;
        }
        Ok(())
    }
}

/// A snapshot of one matching element, taken at query time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub text: String,
    #[serde(default)]
    pub classes: Vec<String>,
}

impl ElementInfo {
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("page context is gone: {0}")]
    Detached(String),
    #[error("element not found: {0}")]
    ElementMissing(String),
    #[error("page script failed: {0}")]
    Script(String),
    #[error("unexpected page script result: {0}")]
    UnexpectedResult(String),
}

/// Everything the automation is allowed to do to the editor page.
#[async_trait]
pub trait TargetPage: Send + Sync {
    /// `location.hostname` of the page.
    async fn host(&self) -> Result<String, PageError>;

    /// Elements matching `selector`, inside `scope` or the whole document.
    async fn query(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> Result<Vec<ElementInfo>, PageError>;

    async fn count(&self, scope: Option<&ElementRef>, selector: &str) -> Result<usize, PageError> {
        Ok(self.query(scope, selector).await?.len())
    }

    /// Pointer press, release and click at the element's centre.
    async fn pointer_click(&self, target: &ElementRef) -> Result<(), PageError>;

    /// Plain `HTMLElement.click()`.
    async fn click(&self, target: &ElementRef) -> Result<(), PageError>;

    /// Instant, centred `scrollIntoView`.
    async fn scroll_into_view(&self, target: &ElementRef) -> Result<(), PageError>;

    /// Assign a one-file list to a file input and fire `input` and `change`.
    async fn set_input_files(
        &self,
        input: &ElementRef,
        file: &ImagePayload,
    ) -> Result<(), PageError>;

    /// `dragenter`, `dragover`, `drop` carrying the file.
    async fn drop_files(&self, target: &ElementRef, file: &ImagePayload) -> Result<(), PageError>;

    /// Apply the decoration unless the element already carries its marker.
    /// Returns whether anything changed.
    async fn decorate_once(
        &self,
        target: &ElementRef,
        decoration: &Decoration,
    ) -> Result<bool, PageError>;

    /// `postMessage({ type })` to the embedding frame.
    async fn post_message(&self, type_tag: &str) -> Result<(), PageError>;
}

/// Treat a vanished element as "did nothing" instead of a failure.
pub fn tolerate_missing(result: Result<(), PageError>) -> Result<bool, PageError> {
    match result {
        Ok(()) => Ok(true),
        Err(PageError::ElementMissing(what)) => {
            tracing::debug!(element = %what, "Element vanished before it could be used");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
