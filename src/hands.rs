use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use headless_chrome::{Browser, Tab};
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::dom::ChromePage;
use crate::page::TargetPage;
use crate::types::TargetId;

/// Binds an activation to a live page context. Failing here is the only
/// failure the activation caller ever hears about.
#[async_trait]
pub trait Injector: Send + Sync {
    async fn inject(&self, target: &TargetId) -> Result<Arc<dyn TargetPage>>;
}

/// Connection to the user's running Chrome.
pub struct BrowserSession {
    browser: Browser,
}

impl BrowserSession {
    /// Attach to Chrome over its DevTools websocket. Blocking.
    pub fn attach(ws_url: &str) -> Result<Self> {
        info!(ws_url, "Attaching to Chrome");
        let browser = Browser::connect(ws_url.to_string())
            .map_err(|e| anyhow!("Could not attach to Chrome at {ws_url}: {e}"))?;
        Ok(Self { browser })
    }

    /// The tab with DevTools target id `target`. Blocking.
    pub fn tab(&self, target: &str) -> Result<Arc<Tab>> {
        self.browser.register_missing_tabs();
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| anyhow!("Chrome tab list is poisoned"))?;
        tabs.iter()
            .find(|t| t.get_target_id().as_str() == target)
            .cloned()
            .ok_or_else(|| anyhow!("No tab with target id {target}"))
    }
}

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Turn `http://host:port` into the browser websocket URL via `/json/version`.
/// Websocket URLs pass through.
pub async fn resolve_ws_url(client: &reqwest::Client, chrome_url: &str) -> Result<String> {
    if chrome_url.starts_with("ws://") || chrome_url.starts_with("wss://") {
        return Ok(chrome_url.to_string());
    }
    let endpoint = format!("{}/json/version", chrome_url.trim_end_matches('/'));
    let info: VersionInfo = client
        .get(&endpoint)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("Chrome is not answering on {endpoint}"))?
        .json()
        .await
        .context("Unexpected /json/version reply")?;
    Ok(info.web_socket_debugger_url)
}

/// Injector backed by a real Chrome, attached lazily and re-attached when
/// the connection drops.
pub struct ChromeInjector {
    chrome_url: String,
    client: reqwest::Client,
    session: Mutex<Option<Arc<BrowserSession>>>,
}

impl ChromeInjector {
    pub fn new(chrome_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            chrome_url: chrome_url.into(),
            client,
            session: Mutex::new(None),
        }
    }

    fn cached(&self) -> Option<Arc<BrowserSession>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn connect(&self) -> Result<Arc<BrowserSession>> {
        let ws_url = resolve_ws_url(&self.client, &self.chrome_url).await?;
        let session = tokio::task::spawn_blocking(move || BrowserSession::attach(&ws_url))
            .await
            .map_err(|e| anyhow!("Chrome attach panicked: {e}"))??;
        let session = Arc::new(session);
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(session)
    }

    async fn find_tab(session: Arc<BrowserSession>, target: &TargetId) -> Result<Arc<Tab>> {
        let target = target.clone();
        tokio::task::spawn_blocking(move || session.tab(&target))
            .await
            .map_err(|e| anyhow!("Tab lookup panicked: {e}"))?
    }
}

#[async_trait]
impl Injector for ChromeInjector {
    async fn inject(&self, target: &TargetId) -> Result<Arc<dyn TargetPage>> {
        if let Some(session) = self.cached() {
            match Self::find_tab(session, target).await {
                Ok(tab) => return Ok(Arc::new(ChromePage::new(tab))),
                Err(e) => {
                    debug!(error = %e, "Cached Chrome session could not find tab, re-attaching");
                }
            }
        }

        let session = self.connect().await?;
        let tab = Self::find_tab(session, target).await.inspect_err(|e| {
            warn!(target_id = %target, error = %e, "Injection failed");
        })?;
        Ok(Arc::new(ChromePage::new(tab)))
    }
}
