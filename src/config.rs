use std::time::Duration;

use anyhow::{bail, Result};
use clap::{ArgAction, Args, Parser};
use tracing::warn;

pub const DEFAULT_LOGIN_URL: &str = "https://sabor.connectmls.com/cvlogin.jsp";

/// Settings for a scrape run. Each flag falls back to the environment
/// variable of the same meaning, which `.env` may provide.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// MLS user id
    #[arg(long, env = "USERID", hide_env_values = true)]
    pub user_id: Option<String>,

    /// MLS password
    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Listing status filter; when unset the site's default search is used
    #[arg(long, env = "STATUS_VALUE")]
    pub status: Option<String>,

    #[arg(long, env = "SEARCH_PRICE_MIN")]
    pub price_min: Option<u64>,

    #[arg(long, env = "SEARCH_PRICE_MAX")]
    pub price_max: Option<u64>,

    #[arg(long, env = "MONTHS_BACK")]
    pub months_back: Option<u32>,

    /// Stop after this many listings
    #[arg(short = 'n', long, env = "SEARCH_RESULTS_LIMIT")]
    pub limit: Option<usize>,

    /// Delay after moving to the next listing (ms)
    #[arg(long, env = "LISTING_PAGE_DELAY", default_value_t = 1000)]
    pub listing_delay_ms: u64,

    /// Delay after opening an agent page (ms)
    #[arg(long, env = "AGENT_PAGE_DELAY", default_value_t = 2000)]
    pub agent_page_delay_ms: u64,

    /// Delay after opening the search tab (ms)
    #[arg(long, env = "NAVIGATE_TO_SEARCH_FORM_DELAY", default_value_t = 5000)]
    pub search_form_delay_ms: u64,

    /// How long to wait for session elements to appear (ms)
    #[arg(long, env = "ELEMENT_TIMEOUT", default_value_t = 30_000)]
    pub element_timeout_ms: u64,

    /// Run the browser without a window ("false" shows it)
    #[arg(long, env = "SILENT", default_value = "true", action = ArgAction::Set, value_parser = parse_silent)]
    pub headless: bool,

    #[arg(long, env = "LOGIN_URL", default_value = DEFAULT_LOGIN_URL)]
    pub login_url: String,
}

/// `Settings` parsed on their own, for when no subcommand is given.
#[derive(Parser)]
#[command(name = "mls_agents")]
struct Standalone {
    #[command(flatten)]
    settings: Settings,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub status: String,
    pub price_min: u64,
    pub price_max: u64,
    pub months_back: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub listing_delay: Duration,
    pub agent_page_delay: Duration,
    pub search_form_delay: Duration,
    pub element_timeout: Duration,
}

/// Anything but an explicit "false" keeps the browser headless.
fn parse_silent(s: &str) -> Result<bool, std::convert::Infallible> {
    Ok(s.trim().to_lowercase() != "false")
}

impl Settings {
    /// Settings from the environment (and `.env`) alone, with defaults for
    /// the rest.
    pub fn from_env() -> Result<Self, clap::Error> {
        Standalone::try_parse_from(["mls_agents"]).map(|s| s.settings)
    }

    pub fn credentials(&self) -> Result<Credentials> {
        let present = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        match (present(&self.user_id), present(&self.password)) {
            (Some(user_id), Some(password)) => Ok(Credentials { user_id, password }),
            _ => bail!("USERID or PASSWORD is not set"),
        }
    }

    /// The search form values, or `None` to keep the site defaults.
    pub fn search_filter(&self) -> Result<Option<SearchFilter>> {
        let Some(status) = self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            warn!("STATUS_VALUE missing, using the site's default search");
            return Ok(None);
        };
        let Some(price_min) = self.price_min else {
            bail!("SEARCH_PRICE_MIN is not set");
        };
        let Some(price_max) = self.price_max else {
            bail!("SEARCH_PRICE_MAX is not set");
        };
        let Some(months_back) = self.months_back else {
            bail!("MONTHS_BACK is not set");
        };
        Ok(Some(SearchFilter {
            status: status.to_string(),
            price_min,
            price_max,
            months_back,
        }))
    }

    pub fn timing(&self) -> Timing {
        Timing {
            listing_delay: Duration::from_millis(self.listing_delay_ms),
            agent_page_delay: Duration::from_millis(self.agent_page_delay_ms),
            search_form_delay: Duration::from_millis(self.search_form_delay_ms),
            element_timeout: Duration::from_millis(self.element_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(args: &[&str]) -> Settings {
        let mut argv = vec!["mls_agents"];
        argv.extend_from_slice(args);
        Standalone::try_parse_from(argv).unwrap().settings
    }

    #[test]
    fn defaults() {
        let s = settings(&["--user-id", "u", "--password", "p"]);
        assert!(s.headless);
        assert_eq!(s.limit, None);
        assert_eq!(s.timing().listing_delay, Duration::from_millis(1000));
        assert_eq!(s.timing().agent_page_delay, Duration::from_millis(2000));
        assert_eq!(s.login_url, DEFAULT_LOGIN_URL);
    }

    #[test]
    fn silent_false_shows_browser() {
        assert!(!settings(&["--headless", " FALSE "]).headless);
        assert!(settings(&["--headless", "banana"]).headless);
    }

    #[test]
    fn credentials_required() {
        assert!(settings(&["--user-id", "u"]).credentials().is_err());
        assert!(settings(&["--user-id", "u", "--password", "  "]).credentials().is_err());
        let c = settings(&["--user-id", "u", "--password", "p"]).credentials().unwrap();
        assert_eq!(c.user_id, "u");
    }

    #[test]
    fn filter_needs_all_values_once_status_is_set() {
        assert_eq!(settings(&[]).search_filter().unwrap(), None);
        assert!(settings(&["--status", "A", "--price-min", "1"])
            .search_filter()
            .is_err());

        let f = settings(&[
            "--status", "A", "--price-min", "100000", "--price-max", "250000", "--months-back", "6",
        ])
        .search_filter()
        .unwrap()
        .unwrap();
        assert_eq!(f.price_max, 250_000);
        assert_eq!(f.months_back, 6);
    }
}
