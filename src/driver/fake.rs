//! Scripted in-memory driver for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{Driver, DriverError, DriverResult, Target};
use crate::site::SiteLayout;

pub const ORIGIN: &str = "https://mls.test";

/// One listing as the navigation panel shows it.
#[derive(Debug, Clone, Default)]
pub struct FakeListing {
    pub has_next: bool,
    /// `href` of the agent link; `None` means the link is missing.
    pub href: Option<String>,
}

impl FakeListing {
    pub fn linking(path: &str) -> Self {
        Self {
            has_next: true,
            href: Some(format!("javascript:openAgent('{}')", path)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeAgent {
    pub name: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    /// 1-based listing currently shown.
    pub listing: usize,
    pub listings: Vec<FakeListing>,
    /// Agent pages by full URL.
    pub agents: HashMap<String, FakeAgent>,
    /// Text of static main-page elements by selector.
    pub statics: HashMap<String, String>,
    pub main_url: String,
    pub open_pages: HashMap<usize, String>,
    pub next_page_id: usize,
    pub opened: usize,
    pub closed: usize,
    pub visited: Vec<String>,
    pub clicks: Vec<Target>,
    pub typed: Vec<(Target, String)>,
    pub pauses: Vec<Duration>,
    /// The browser goes away once this many agent pages have been closed.
    pub lose_session_after: Option<usize>,
}

pub struct FakeDriver {
    layout: SiteLayout,
    main: usize,
    pub state: Mutex<FakeState>,
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    page: usize,
    target: Target,
}

impl FakeDriver {
    pub fn new(layout: SiteLayout) -> Self {
        Self {
            layout,
            main: 0,
            state: Mutex::new(FakeState {
                listing: 1,
                next_page_id: 1,
                main_url: format!("{}/listing/report.jsp", ORIGIN),
                ..Default::default()
            }),
        }
    }

    pub fn with_listings(self, listings: Vec<FakeListing>) -> Self {
        self.state.lock().unwrap().listings = listings;
        self
    }

    pub fn with_agent(self, path: &str, name: Option<&str>, details: Option<&str>) -> Self {
        self.state.lock().unwrap().agents.insert(
            format!("{}{}", ORIGIN, path),
            FakeAgent {
                name: name.map(String::from),
                details: details.map(String::from),
            },
        );
        self
    }

    pub fn with_static(self, target: &Target, text: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .statics
            .insert(target.selector.clone(), text.to_string());
        self
    }

    /// Every element the sign-in and search flow needs, with `total` as the
    /// listing count shown in the navigation panel.
    pub fn with_search_flow(self, total: &str) -> Self {
        let layout = self.layout.clone();
        let mut driver = self;
        for target in [
            &layout.username_input,
            &layout.password_input,
            &layout.sign_in_button,
            &layout.search_tab,
            &layout.search_form,
            &layout.status_input,
            &layout.price_min_input,
            &layout.price_max_input,
            &layout.months_back_input,
            &layout.search_button,
            &layout.listings_pane,
            &layout.first_result_link,
            &layout.listing_report,
        ] {
            driver = driver.with_static(target, "");
        }
        driver.with_static(&layout.total_listings, total)
    }

    fn guard(&self, state: &FakeState) -> DriverResult<()> {
        match state.lose_session_after {
            Some(n) if state.closed >= n => Err(DriverError::SessionClosed),
            _ => Ok(()),
        }
    }

    fn lookup(&self, state: &FakeState, page: usize, target: &Target) -> Option<String> {
        if page == self.main {
            let listing = state.listing.checked_sub(1).and_then(|i| state.listings.get(i));
            if *target == self.layout.next_listing {
                return listing.filter(|l| l.has_next).map(|_| String::new());
            }
            if *target == self.layout.agent_link {
                return listing.and_then(|l| l.href.clone());
            }
            return state.statics.get(&target.selector).cloned();
        }

        let agent = state
            .open_pages
            .get(&page)
            .and_then(|url| state.agents.get(url))?;
        if *target == self.layout.agent_name {
            agent.name.clone()
        } else if *target == self.layout.agent_details {
            agent.details.clone()
        } else {
            None
        }
    }
}

impl Driver for FakeDriver {
    type Page = usize;
    type Element = FakeElement;

    fn main_page(&self) -> &usize {
        &self.main
    }

    async fn navigate(&self, page: &usize, url: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        self.guard(&state)?;
        state.visited.push(url.to_string());
        if *page == self.main {
            state.main_url = url.to_string();
        } else {
            state.open_pages.insert(*page, url.to_string());
        }
        Ok(())
    }

    async fn current_url(&self, page: &usize) -> DriverResult<String> {
        let state = self.state.lock().unwrap();
        self.guard(&state)?;
        if *page == self.main {
            Ok(state.main_url.clone())
        } else {
            Ok(state.open_pages.get(page).cloned().unwrap_or_default())
        }
    }

    async fn find_element(&self, page: &usize, target: &Target) -> DriverResult<Option<FakeElement>> {
        let state = self.state.lock().unwrap();
        self.guard(&state)?;
        Ok(self.lookup(&state, *page, target).map(|_| FakeElement {
            page: *page,
            target: target.clone(),
        }))
    }

    async fn click(&self, element: &FakeElement) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        self.guard(&state)?;
        if element.target == self.layout.next_listing {
            state.listing += 1;
        }
        state.clicks.push(element.target.clone());
        Ok(())
    }

    async fn type_text(&self, element: &FakeElement, text: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        self.guard(&state)?;
        state.typed.push((element.target.clone(), text.to_string()));
        Ok(())
    }

    async fn wait_for_element(&self, page: &usize, target: &Target, timeout: Duration) -> DriverResult<()> {
        let state = self.state.lock().unwrap();
        self.guard(&state)?;
        match self.lookup(&state, *page, target) {
            Some(_) => Ok(()),
            None => Err(DriverError::Timeout {
                target: target.clone(),
                timeout,
            }),
        }
    }

    async fn read_text(&self, element: &FakeElement) -> DriverResult<String> {
        let state = self.state.lock().unwrap();
        self.guard(&state)?;
        self.lookup(&state, element.page, &element.target)
            .ok_or_else(|| DriverError::NotFound(element.target.clone()))
    }

    async fn read_attribute(&self, element: &FakeElement, _name: &str) -> DriverResult<String> {
        self.read_text(element).await
    }

    async fn open_page(&self) -> DriverResult<usize> {
        let mut state = self.state.lock().unwrap();
        self.guard(&state)?;
        let id = state.next_page_id;
        state.next_page_id += 1;
        state.open_pages.insert(id, String::new());
        state.opened += 1;
        Ok(id)
    }

    async fn close_page(&self, page: usize) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        state.open_pages.remove(&page);
        state.closed += 1;
        Ok(())
    }

    async fn pause(&self, delay: Duration) {
        self.state.lock().unwrap().pauses.push(delay);
    }
}
