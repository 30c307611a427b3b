pub mod chrome;
#[cfg(test)]
pub mod fake;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Something to look up on a page: a CSS selector, optionally scoped to a
/// named frame of that page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub frame: Option<String>,
    pub selector: String,
}

impl Target {
    pub fn page(selector: &str) -> Self {
        Self {
            frame: None,
            selector: selector.to_string(),
        }
    }

    pub fn in_frame(frame: &str, selector: &str) -> Self {
        Self {
            frame: Some(frame.to_string()),
            selector: selector.to_string(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.frame {
            Some(frame) => write!(f, "{}::{}", frame, self.selector),
            None => f.write_str(&self.selector),
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("element not found: {0}")]
    NotFound(Target),
    #[error("timed out after {ms}ms waiting for {target}", ms = .timeout.as_millis())]
    Timeout { target: Target, timeout: Duration },
    #[error("browser session closed")]
    SessionClosed,
    #[error("page script failed: {0}")]
    Script(String),
    #[error("driver backend error: {0}")]
    Backend(String),
}

impl DriverError {
    /// Fatal errors end the whole run; everything else only costs a listing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::SessionClosed)
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Page-automation capabilities the scraper needs. Every call may fail.
///
/// `Page` is a page context (tab); `Element` is a resolved element on one.
#[allow(async_fn_in_trait)]
pub trait Driver {
    type Page;
    type Element;

    /// The long-lived page the session signs in on.
    fn main_page(&self) -> &Self::Page;

    async fn navigate(&self, page: &Self::Page, url: &str) -> DriverResult<()>;

    async fn current_url(&self, page: &Self::Page) -> DriverResult<String>;

    async fn find_element(
        &self,
        page: &Self::Page,
        target: &Target,
    ) -> DriverResult<Option<Self::Element>>;

    async fn click(&self, element: &Self::Element) -> DriverResult<()>;

    async fn type_text(&self, element: &Self::Element, text: &str) -> DriverResult<()>;

    async fn wait_for_element(
        &self,
        page: &Self::Page,
        target: &Target,
        timeout: Duration,
    ) -> DriverResult<()>;

    async fn read_text(&self, element: &Self::Element) -> DriverResult<String>;

    async fn read_attribute(&self, element: &Self::Element, name: &str) -> DriverResult<String>;

    async fn open_page(&self) -> DriverResult<Self::Page>;

    async fn close_page(&self, page: Self::Page) -> DriverResult<()>;

    async fn pause(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }

    /// `find_element`, with absence turned into [`DriverError::NotFound`].
    async fn require(&self, page: &Self::Page, target: &Target) -> DriverResult<Self::Element> {
        self.find_element(page, target)
            .await?
            .ok_or_else(|| DriverError::NotFound(target.clone()))
    }
}
