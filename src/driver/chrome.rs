use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Driver, DriverError, DriverResult, Target};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// [`Driver`] over a Chrome/Chromium instance spoken to via DevTools.
///
/// Frames are addressed by name through `window.frames`, so element lookups
/// are done in page scripts rather than with CDP node handles.
pub struct ChromeDriver {
    browser: Browser,
    main: Page,
    alive: Arc<AtomicBool>,
    events: JoinHandle<()>,
}

/// An element is re-resolved from its target on every use.
#[derive(Clone)]
pub struct ChromeElement {
    page: Page,
    target: Target,
}

enum Action<'a> {
    Probe,
    Click,
    Text,
    Attribute(&'a str),
    Type(&'a str),
}

#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    found: bool,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ChromeDriver {
    pub async fn launch(headless: bool) -> anyhow::Result<Self> {
        let mut builder = BrowserConfig::builder();
        if !headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("Invalid browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch Chrome")?;

        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP event error: {}", e);
                }
            }
            flag.store(false, Ordering::SeqCst);
            warn!("Browser connection closed");
        });

        let main = browser
            .new_page("about:blank")
            .await
            .context("Failed to open main page")?;

        Ok(Self {
            browser,
            main,
            alive,
            events,
        })
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.browser.close().await.context("Failed to close browser")?;
        self.browser.wait().await.context("Browser did not exit")?;
        self.events.abort();
        Ok(())
    }

    fn check(&self) -> DriverResult<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DriverError::SessionClosed)
        }
    }

    fn cdp(&self, e: CdpError) -> DriverError {
        if self.alive.load(Ordering::SeqCst) {
            DriverError::Backend(e.to_string())
        } else {
            DriverError::SessionClosed
        }
    }

    async fn run(&self, page: &Page, target: &Target, action: Action<'_>) -> DriverResult<Reply> {
        self.check()?;
        let script = build_script(target, &action)?;
        let raw: String = page
            .evaluate_expression(EvaluateParams::new(script))
            .await
            .map_err(|e| self.cdp(e))?
            .into_value()
            .map_err(|e| DriverError::Script(e.to_string()))?;

        let reply: Reply =
            serde_json::from_str(&raw).map_err(|e| DriverError::Script(e.to_string()))?;
        if !reply.ok {
            return Err(DriverError::Script(reply.error.unwrap_or_default()));
        }
        Ok(reply)
    }

    async fn on_element(&self, element: &ChromeElement, action: Action<'_>) -> DriverResult<Reply> {
        let reply = self.run(&element.page, &element.target, action).await?;
        if !reply.found {
            return Err(DriverError::NotFound(element.target.clone()));
        }
        Ok(reply)
    }
}

impl Driver for ChromeDriver {
    type Page = Page;
    type Element = ChromeElement;

    fn main_page(&self) -> &Page {
        &self.main
    }

    async fn navigate(&self, page: &Page, url: &str) -> DriverResult<()> {
        self.check()?;
        page.goto(url).await.map_err(|e| self.cdp(e))?;
        Ok(())
    }

    async fn current_url(&self, page: &Page) -> DriverResult<String> {
        self.check()?;
        let url = page.url().await.map_err(|e| self.cdp(e))?;
        Ok(url.unwrap_or_default())
    }

    async fn find_element(&self, page: &Page, target: &Target) -> DriverResult<Option<ChromeElement>> {
        let reply = self.run(page, target, Action::Probe).await?;
        Ok(reply.found.then(|| ChromeElement {
            page: page.clone(),
            target: target.clone(),
        }))
    }

    async fn click(&self, element: &ChromeElement) -> DriverResult<()> {
        self.on_element(element, Action::Click).await.map(drop)
    }

    async fn type_text(&self, element: &ChromeElement, text: &str) -> DriverResult<()> {
        self.on_element(element, Action::Type(text)).await.map(drop)
    }

    async fn wait_for_element(&self, page: &Page, target: &Target, timeout: Duration) -> DriverResult<()> {
        poll_until_found(target, timeout, POLL_INTERVAL, move || async move {
            self.run(page, target, Action::Probe).await.map(|reply| reply.found)
        })
        .await
    }

    async fn read_text(&self, element: &ChromeElement) -> DriverResult<String> {
        let reply = self.on_element(element, Action::Text).await?;
        Ok(reply.value.unwrap_or_default())
    }

    async fn read_attribute(&self, element: &ChromeElement, name: &str) -> DriverResult<String> {
        let reply = self.on_element(element, Action::Attribute(name)).await?;
        Ok(reply.value.unwrap_or_default())
    }

    async fn open_page(&self) -> DriverResult<Page> {
        self.check()?;
        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| self.cdp(e))
    }

    async fn close_page(&self, page: Page) -> DriverResult<()> {
        self.check()?;
        page.close().await.map_err(|e| self.cdp(e))
    }
}

/// Probe until `target` shows up or `timeout` runs out. Probes that fail
/// while the page is navigating count as "not there yet"; only a lost
/// session ends the wait early.
async fn poll_until_found<F, Fut>(
    target: &Target,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> DriverResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DriverResult<bool>>,
{
    let start = Instant::now();
    loop {
        match probe().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!("Still waiting for {}: {}", target, e),
        }
        if start.elapsed() >= timeout {
            return Err(DriverError::Timeout {
                target: target.clone(),
                timeout,
            });
        }
        tokio::time::sleep(interval).await;
    }
}

/// Page script that resolves `target` and performs `action` on it. It always
/// evaluates to a JSON string matching [`Reply`].
fn build_script(target: &Target, action: &Action<'_>) -> DriverResult<String> {
    let lit = |s: &str| serde_json::to_string(s).map_err(|e| DriverError::Script(e.to_string()));

    let frame = match &target.frame {
        Some(name) => lit(name)?,
        None => "null".to_string(),
    };
    let selector = lit(&target.selector)?;

    let body = match action {
        Action::Probe => "return { found: true };".to_string(),
        Action::Click => "el.click(); return { found: true };".to_string(),
        Action::Text => "return { found: true, value: el.innerText };".to_string(),
        Action::Attribute(name) => {
            let name = lit(name)?;
            format!(
                "const v = el[{name}]; \
                 return {{ found: true, value: typeof v === 'string' ? v : el.getAttribute({name}) }};"
            )
        }
        Action::Type(text) => {
            let text = lit(text)?;
            format!(
                "el.focus(); el.value = {text}; \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                 return {{ found: true }};"
            )
        }
    };

    Ok(format!(
        "(() => {{ \
           const run = () => {{ \
             let doc = document; \
             const frame = {frame}; \
             if (frame !== null) {{ \
               const w = window.frames[frame]; \
               if (!w) return {{ found: false }}; \
               doc = w.document; \
             }} \
             const el = doc.querySelector({selector}); \
             if (!el) return {{ found: false }}; \
             {body} \
           }}; \
           try {{ return JSON.stringify(Object.assign({{ ok: true }}, run())); }} \
           catch (e) {{ return JSON.stringify({{ ok: false, error: String(e) }}); }} \
         }})()"
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn script_escapes_selectors_and_text() {
        let target = Target::in_frame("workspace", r#"input[name="userid"]"#);
        let script = build_script(&target, &Action::Type("it's \"me\"")).unwrap();
        assert!(script.contains(r#"const frame = "workspace";"#));
        assert!(script.contains(r#"doc.querySelector("input[name=\"userid\"]")"#));
        assert!(script.contains(r#"el.value = "it's \"me\"";"#));
    }

    #[test]
    fn top_level_target_has_null_frame() {
        let script = build_script(&Target::page("strong"), &Action::Text).unwrap();
        assert!(script.contains("const frame = null;"));
        assert!(script.contains("value: el.innerText"));
    }

    #[tokio::test]
    async fn wait_rides_out_navigation_errors() {
        let target = Target::page("#search");
        let calls = AtomicUsize::new(0);
        let res = poll_until_found(&target, Duration::from_secs(5), Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => Err(DriverError::Backend("Execution context was destroyed".into())),
                    1 => Err(DriverError::Script("frame not ready".into())),
                    2 => Ok(false),
                    _ => Ok(true),
                }
            }
        })
        .await;
        assert!(res.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn wait_stops_on_lost_session() {
        let target = Target::page("#search");
        let calls = AtomicUsize::new(0);
        let res = poll_until_found(&target, Duration::from_secs(5), Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DriverError::SessionClosed) }
        })
        .await;
        assert!(matches!(res, Err(DriverError::SessionClosed)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_times_out_on_persistent_errors() {
        let target = Target::page("#search");
        let res = poll_until_found(&target, Duration::from_millis(5), Duration::from_millis(1), || async {
            Err(DriverError::Backend("no frame".into()))
        })
        .await;
        assert!(matches!(res, Err(DriverError::Timeout { .. })));
    }

    #[test]
    fn reply_defaults() {
        let r: Reply = serde_json::from_str(r#"{"ok":true}"#).unwrap();
        assert!(r.ok && !r.found && r.value.is_none() && r.error.is_none());
    }
}
