//! Page structure of the MLS site, kept as data so a layout change means
//! editing selectors, not control flow.

use crate::driver::Target;

const WORKSPACE: &str = "workspace";
const NAVPANEL: &str = "navpanel";

#[derive(Debug, Clone)]
pub struct SiteLayout {
    // Sign-in (main page)
    pub username_input: Target,
    pub password_input: Target,
    pub sign_in_button: Target,
    pub search_tab: Target,

    // Search form (workspace frame)
    pub search_form: Target,
    pub status_input: Target,
    pub price_min_input: Target,
    pub price_max_input: Target,
    pub months_back_input: Target,
    pub search_button: Target,
    pub listings_pane: Target,
    pub first_result_link: Target,
    pub listing_report: Target,

    // Listing navigation
    pub total_listings: Target,
    pub next_listing: Target,
    pub agent_link: Target,

    // Agent detail page
    pub agent_name: Target,
    pub agent_details: Target,
}

impl Default for SiteLayout {
    fn default() -> Self {
        Self {
            username_input: Target::page(".login-credentials .login-input input[name=userid]"),
            password_input: Target::page(".login-credentials .login-input input[name=password]"),
            sign_in_button: Target::page(".login-button input[name=login]"),
            search_tab: Target::page("#search > div"),

            search_form: Target::in_frame(WORKSPACE, ".searchFieldContainer > table"),
            status_input: Target::in_frame(WORKSPACE, "#STATUSID"),
            price_min_input: Target::in_frame(WORKSPACE, "#minSRCHPRICE"),
            price_max_input: Target::in_frame(WORKSPACE, "#maxSRCHPRICE"),
            months_back_input: Target::in_frame(WORKSPACE, "#MONTHS_BACKID"),
            search_button: Target::in_frame(WORKSPACE, "#searchButtonTop"),
            listings_pane: Target::in_frame(WORKSPACE, "div#listingspane"),
            // Row 1 is the table header.
            first_result_link: Target::in_frame(
                WORKSPACE,
                "div#listingspane > table tr:nth-child(2) td:nth-child(3) a",
            ),
            listing_report: Target::in_frame(WORKSPACE, "div#listingspane div.report"),

            total_listings: Target::in_frame(NAVPANEL, "table td:nth-child(3) b:nth-child(2)"),
            next_listing: Target::in_frame(NAVPANEL, "table td:nth-child(4) > div.nextBtn"),
            agent_link: Target::in_frame(
                WORKSPACE,
                "div#listingspane div.report table:nth-child(8) tr:nth-child(2) td:nth-child(2) a",
            ),

            agent_name: Target::page("table table table table tr strong"),
            agent_details: Target::page("table table table table tr:nth-child(2) td:last-child"),
        }
    }
}
