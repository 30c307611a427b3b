use std::sync::LazyLock;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tracing::info;

use crate::config::{Credentials, SearchFilter, Timing};
use crate::driver::Driver;
use crate::site::SiteLayout;

static ORIGIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(https?://[^/:?#]+(?::\d+)?)").unwrap());

/// Where the walk starts: the first listing report is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingSession {
    /// Scheme and host that agent page paths are relative to.
    pub origin: String,
    pub total_listings: usize,
}

/// Sign in, run the search and open the first result. Every failure here is
/// fatal for the run.
pub async fn open<D: Driver>(
    driver: &D,
    layout: &SiteLayout,
    login_url: &str,
    credentials: &Credentials,
    filter: Option<&SearchFilter>,
    timing: &Timing,
) -> Result<ListingSession> {
    let page = driver.main_page();

    info!("Signing in at {}", login_url);
    driver.navigate(page, login_url).await.context("Failed to open login page")?;
    let user = driver.require(page, &layout.username_input).await?;
    driver.type_text(&user, &credentials.user_id).await?;
    let pass = driver.require(page, &layout.password_input).await?;
    driver.type_text(&pass, &credentials.password).await?;
    let sign_in = driver.require(page, &layout.sign_in_button).await?;
    driver.click(&sign_in).await?;
    driver
        .wait_for_element(page, &layout.search_tab, timing.element_timeout)
        .await
        .context("Sign-in did not reach the search tab")?;
    info!("Signed in");

    let tab = driver.require(page, &layout.search_tab).await?;
    driver.click(&tab).await?;
    driver.pause(timing.search_form_delay).await;
    driver
        .wait_for_element(page, &layout.search_form, timing.element_timeout)
        .await
        .context("Search form did not load")?;

    if let Some(filter) = filter {
        info!(?filter, "Filling in search form");
        let fields = [
            (&layout.status_input, filter.status.clone()),
            (&layout.price_min_input, filter.price_min.to_string()),
            (&layout.price_max_input, filter.price_max.to_string()),
            (&layout.months_back_input, filter.months_back.to_string()),
        ];
        for (target, value) in fields {
            let input = driver.require(page, target).await?;
            driver.type_text(&input, &value).await?;
        }
    }

    info!("Waiting for results...");
    let search = driver.require(page, &layout.search_button).await?;
    driver.click(&search).await?;
    driver
        .wait_for_element(page, &layout.listings_pane, timing.element_timeout)
        .await
        .context("Search returned no listings pane")?;

    let first = driver.require(page, &layout.first_result_link).await?;
    driver.click(&first).await?;
    driver
        .wait_for_element(page, &layout.listing_report, timing.element_timeout)
        .await
        .context("First listing did not open")?;

    let url = driver.current_url(page).await?;
    let origin = origin_of(&url).ok_or_else(|| anyhow!("Cannot determine site origin from {:?}", url))?;

    let counter = driver.require(page, &layout.total_listings).await?;
    let raw = driver.read_text(&counter).await?;
    let total_listings = raw
        .trim()
        .parse::<usize>()
        .with_context(|| format!("Listing count {:?} is not a number", raw))?;

    info!(%origin, total_listings, "Search results ready");
    Ok(ListingSession {
        origin,
        total_listings,
    })
}

/// `https://host.example/a/b?c` → `https://host.example`
pub fn origin_of(url: &str) -> Option<String> {
    ORIGIN_RE.captures(url).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::driver::fake::FakeDriver;

    fn timing() -> Timing {
        Timing {
            listing_delay: Duration::from_millis(1),
            agent_page_delay: Duration::from_millis(2),
            search_form_delay: Duration::from_millis(5),
            element_timeout: Duration::from_millis(10),
        }
    }

    fn creds() -> Credentials {
        Credentials {
            user_id: "agent007".into(),
            password: "hunter2".into(),
        }
    }

    fn site(layout: &SiteLayout, total: &str) -> FakeDriver {
        FakeDriver::new(layout.clone()).with_search_flow(total)
    }

    #[tokio::test]
    async fn opens_search_results() {
        let layout = SiteLayout::default();
        let driver = site(&layout, " 42 ");
        let filter = SearchFilter {
            status: "S".into(),
            price_min: 100,
            price_max: 200,
            months_back: 3,
        };

        let session = open(&driver, &layout, "https://mls.test/cvlogin.jsp", &creds(), Some(&filter), &timing())
            .await
            .unwrap();

        assert_eq!(session.total_listings, 42);
        assert_eq!(session.origin, "https://mls.test");

        let state = driver.state.lock().unwrap();
        let typed: Vec<&str> = state.typed.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(typed, ["agent007", "hunter2", "S", "100", "200", "3"]);
        assert_eq!(state.clicks.last(), Some(&layout.first_result_link));
        assert_eq!(state.pauses, [Duration::from_millis(5)]);
    }

    #[tokio::test]
    async fn default_search_leaves_form_untouched() {
        let layout = SiteLayout::default();
        let driver = site(&layout, "1");
        open(&driver, &layout, "https://mls.test/cvlogin.jsp", &creds(), None, &timing())
            .await
            .unwrap();
        assert_eq!(driver.state.lock().unwrap().typed.len(), 2);
    }

    #[tokio::test]
    async fn unreadable_total_is_fatal() {
        let layout = SiteLayout::default();
        let driver = site(&layout, "many");
        let err = open(&driver, &layout, "https://mls.test/cvlogin.jsp", &creds(), None, &timing())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }

    #[test]
    fn origin() {
        assert_eq!(
            origin_of("https://sabor.connectmls.com/slides/x.jsp?id=1").as_deref(),
            Some("https://sabor.connectmls.com")
        );
        assert_eq!(origin_of("http://localhost:8080/").as_deref(), Some("http://localhost:8080"));
        assert_eq!(origin_of("about:blank"), None);
    }
}
