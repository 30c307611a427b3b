use std::fmt;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::Timing;
use crate::driver::{Driver, DriverError, Target};
use crate::parser;
use crate::record::ContactRecord;
use crate::site::SiteLayout;
use crate::store::RecordStore;

/// Where a listing is in its visit. `Recorded` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    AwaitingNextControl,
    AwaitingDetailLink,
    AwaitingAgentPage,
    AwaitingFields,
    Recorded,
    Skipped,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Idle => "idle",
            Stage::AwaitingNextControl => "next-listing control",
            Stage::AwaitingDetailLink => "agent link",
            Stage::AwaitingAgentPage => "agent page",
            Stage::AwaitingFields => "agent fields",
            Stage::Recorded => "recorded",
            Stage::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Everything a run accumulates. Owned by the caller so whatever was
/// collected survives a walk that ends early.
#[derive(Debug)]
pub struct RunState {
    pub store: RecordStore,
    /// Recoverable skips so far.
    pub errors: usize,
    /// Records dropped for lack of an email.
    pub discarded: usize,
    /// 1-based index of the listing being (or about to be) visited.
    pub index: usize,
    pub stage: Stage,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            store: RecordStore::new(),
            errors: 0,
            discarded: 0,
            index: 1,
            stage: Stage::Idle,
        }
    }
}

enum Visit {
    Record(ContactRecord),
    NoEmail(ContactRecord),
}

enum StepError {
    Skip { stage: Stage, reason: String },
    Fatal { stage: Stage, error: DriverError },
}

impl StepError {
    fn at(stage: Stage) -> impl FnOnce(DriverError) -> StepError {
        move |e| {
            if e.is_fatal() {
                StepError::Fatal { stage, error: e }
            } else {
                StepError::Skip {
                    stage,
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Walks the search results one listing at a time, scraping the listing
/// agent of each into a [`RunState`].
pub struct PaginationWalker<'a, D: Driver> {
    driver: &'a D,
    layout: &'a SiteLayout,
    timing: Timing,
    origin: String,
}

impl<'a, D: Driver> PaginationWalker<'a, D> {
    pub fn new(driver: &'a D, layout: &'a SiteLayout, timing: Timing, origin: impl Into<String>) -> Self {
        Self {
            driver,
            layout,
            timing,
            origin: origin.into(),
        }
    }

    /// Visit listings `run.index..=min(total, cap)` in order. A listing that
    /// fails is counted and skipped, never retried. Only a lost browser
    /// session ends the walk early.
    pub async fn walk(&self, total: usize, cap: Option<usize>, run: &mut RunState) -> Result<(), DriverError> {
        let end = cap.map_or(total, |cap| cap.min(total));
        if cap.is_some() {
            info!("Listing cap set, stopping at listing {} of {}", end, total);
        }

        let pb = ProgressBar::new(end as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_position(run.index.saturating_sub(1) as u64);

        while run.index <= end {
            info!("Processing listing {} of {}", run.index, total);

            run.stage = match self.visit().await {
                Ok(Visit::Record(record)) => {
                    info!(name = %record.name, "Recorded agent");
                    debug!(?record, "Parsed agent");
                    run.store.push(record);
                    Stage::Recorded
                }
                Ok(Visit::NoEmail(record)) => {
                    info!(name = %record.name, "Skipping agent without email");
                    run.discarded += 1;
                    Stage::Skipped
                }
                Err(StepError::Skip { stage, reason }) => {
                    warn!(listing = run.index, "Error @ {}: {}; skipping", stage, reason);
                    run.errors += 1;
                    self.driver.pause(self.timing.listing_delay).await;
                    Stage::Skipped
                }
                Err(StepError::Fatal { stage, error }) => {
                    run.stage = stage;
                    pb.abandon();
                    return Err(error);
                }
            };

            run.index += 1;
            pb.inc(1);
            pb.set_message(format!("errors: {}", run.errors));
        }

        pb.finish_and_clear();
        info!(
            recorded = run.store.len(),
            skipped = run.errors,
            discarded = run.discarded,
            "Finished walking listings"
        );
        Ok(())
    }

    async fn visit(&self) -> Result<Visit, StepError> {
        let driver = self.driver;
        let main = driver.main_page();

        let next = driver
            .require(main, &self.layout.next_listing)
            .await
            .map_err(StepError::at(Stage::AwaitingNextControl))?;

        let url = match self.detail_url().await {
            Ok(url) => url,
            Err(e) => {
                // Keep the listing view in step with the index.
                if let Err(click) = driver.click(&next).await {
                    debug!("Could not advance past broken listing: {}", click);
                }
                return Err(e);
            }
        };

        driver
            .click(&next)
            .await
            .map_err(StepError::at(Stage::AwaitingDetailLink))?;
        driver.pause(self.timing.listing_delay).await;

        let page = driver
            .open_page()
            .await
            .map_err(StepError::at(Stage::AwaitingAgentPage))?;
        let fields = self.read_agent(&page, &url).await;
        if let Err(e) = driver.close_page(page).await {
            if e.is_fatal() {
                return Err(StepError::Fatal {
                    stage: Stage::AwaitingAgentPage,
                    error: e,
                });
            }
            warn!("Failed to close agent page: {}", e);
        }
        let (name, details) = fields?;

        debug!(?details, "Raw details scraped");
        let record = parser::parse(&name, &details);
        if record.has_email() {
            Ok(Visit::Record(record))
        } else {
            Ok(Visit::NoEmail(record))
        }
    }

    async fn detail_url(&self) -> Result<String, StepError> {
        let main = self.driver.main_page();
        let link = self
            .driver
            .require(main, &self.layout.agent_link)
            .await
            .map_err(StepError::at(Stage::AwaitingDetailLink))?;
        let href = self
            .driver
            .read_attribute(&link, "href")
            .await
            .map_err(StepError::at(Stage::AwaitingDetailLink))?;

        detail_url(&self.origin, &href).ok_or_else(|| StepError::Skip {
            stage: Stage::AwaitingDetailLink,
            reason: format!("no agent path in href {:?}", href),
        })
    }

    async fn read_agent(&self, page: &D::Page, url: &str) -> Result<(String, Vec<String>), StepError> {
        let driver = self.driver;

        driver
            .navigate(page, url)
            .await
            .map_err(StepError::at(Stage::AwaitingAgentPage))?;
        driver.pause(self.timing.agent_page_delay).await;

        let name = self
            .text_of(page, &self.layout.agent_name)
            .await
            .map_err(StepError::at(Stage::AwaitingFields))?;
        if name.trim().is_empty() {
            return Err(StepError::Skip {
                stage: Stage::AwaitingFields,
                reason: "agent name empty".into(),
            });
        }

        let details = self
            .text_of(page, &self.layout.agent_details)
            .await
            .map_err(StepError::at(Stage::AwaitingFields))?;
        if details.trim().is_empty() {
            return Err(StepError::Skip {
                stage: Stage::AwaitingFields,
                reason: "agent details empty".into(),
            });
        }

        Ok((name, details.lines().map(String::from).collect()))
    }

    async fn text_of(&self, page: &D::Page, target: &Target) -> Result<String, DriverError> {
        let element = self.driver.require(page, target).await?;
        self.driver.read_text(&element).await
    }
}

/// The agent link calls a script with the page path as its first quoted
/// argument: `javascript:openAgent('/path?id=1')`.
pub fn detail_url(origin: &str, href: &str) -> Option<String> {
    href.split('\'')
        .nth(1)
        .filter(|path| !path.is_empty())
        .map(|path| format!("{}{}", origin, path))
}
