//! Per-tab background work that outlives any single run: the copy
//! watcher and the copy-button styling task.
//!
//! A [`PageSession`] is created the first time a tab is activated and is
//! torn down when the tab goes away (the tasks stop on a detached page) or
//! when the session is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Profile;
use crate::face::HostEvent;
use crate::page::{ElementRef, PageError, TargetPage};
use crate::types::{COPY_COMPLETE_MESSAGE, TargetId};

/// Lets one signal through, then stays shut for `window`.
#[derive(Debug)]
pub struct Debounce {
    window: Duration,
    shut_until: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            shut_until: None,
        }
    }

    /// True if a signal may be emitted now; arms the window when it is.
    pub fn try_fire(&mut self, now: Instant) -> bool {
        if self.shut_until.is_some_and(|until| now < until) {
            return false;
        }
        self.shut_until = Some(now + self.window);
        true
    }
}

/// Watches the editor's status region for the clipboard confirmation.
pub struct CopyWatcher {
    target: TargetId,
    page: Arc<dyn TargetPage>,
    profile: Arc<Profile>,
    events: broadcast::Sender<HostEvent>,
    debounce: Debounce,
}

impl CopyWatcher {
    pub fn new(
        target: TargetId,
        page: Arc<dyn TargetPage>,
        profile: Arc<Profile>,
        events: broadcast::Sender<HostEvent>,
    ) -> Self {
        let window = Duration::from_millis(profile.timings.copy_debounce_ms);
        Self {
            target,
            page,
            profile,
            events,
            debounce: Debounce::new(window),
        }
    }

    /// Poll until the page goes away.
    pub async fn watch(mut self) {
        let period = Duration::from_millis(self.profile.timings.copy_watch_interval_ms);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.check().await {
                Ok(()) => {}
                Err(PageError::Detached(why)) => {
                    debug!(target_id = %self.target, %why, "Copy watcher stopping");
                    return;
                }
                Err(e) => debug!(target_id = %self.target, error = %e, "Copy watcher check failed"),
            }
        }
    }

    async fn check(&mut self) -> Result<(), PageError> {
        let statuses = self
            .page
            .query(None, &self.profile.selectors.status_region)
            .await?;
        let copied = statuses
            .iter()
            .any(|s| s.text.contains(self.profile.labels.copied.as_str()));
        if !copied {
            return Ok(());
        }
        if !on_editor(self.page.as_ref(), &self.profile).await? {
            debug!(target_id = %self.target, "Tab left the editor, not notifying");
            return Ok(());
        }
        if !self.debounce.try_fire(Instant::now()) {
            return Ok(());
        }

        info!(target_id = %self.target, "Editor copied the mockup to the clipboard");
        self.page.post_message(COPY_COMPLETE_MESSAGE).await?;
        let _ = self.events.send(HostEvent::CopyComplete {
            target: self.target.clone(),
        });
        Ok(())
    }
}

/// Marks the editor's copy button once per rendered button.
pub async fn style_copy_button(page: Arc<dyn TargetPage>, profile: Arc<Profile>) {
    let timings = &profile.timings;
    tokio::time::sleep(Duration::from_millis(timings.styling_initial_ms)).await;
    let mut ticker = tokio::time::interval(Duration::from_millis(timings.styling_interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match decorate(page.as_ref(), &profile).await {
            Ok(true) => debug!("Copy button styled"),
            Ok(false) => {}
            Err(PageError::Detached(_)) => return,
            Err(e) => debug!(error = %e, "Styling copy button failed"),
        }
    }
}

async fn decorate(page: &dyn TargetPage, profile: &Profile) -> Result<bool, PageError> {
    let selector = &profile.selectors.copy_button;
    if page.count(None, selector).await? == 0 || !on_editor(page, profile).await? {
        return Ok(false);
    }
    match page
        .decorate_once(&ElementRef::first(selector), &profile.copy_button_style)
        .await
    {
        Err(PageError::ElementMissing(_)) => Ok(false),
        other => other,
    }
}

/// The tab may have navigated away since the session started; nothing is
/// written into a page that is not the editor.
async fn on_editor(page: &dyn TargetPage, profile: &Profile) -> Result<bool, PageError> {
    Ok(profile.host_matches(&page.host().await?))
}

/// Background tasks bound to one tab.
pub struct PageSession {
    watcher: JoinHandle<()>,
    styler: JoinHandle<()>,
}

impl PageSession {
    pub fn start(
        target: TargetId,
        page: Arc<dyn TargetPage>,
        profile: Arc<Profile>,
        events: broadcast::Sender<HostEvent>,
    ) -> Self {
        info!(target_id = %target, "Starting page session");
        let watcher = CopyWatcher::new(target, page.clone(), profile.clone(), events);
        Self {
            watcher: tokio::spawn(watcher.watch()),
            styler: tokio::spawn(style_copy_button(page, profile)),
        }
    }

    /// The copy watcher is what ends when the tab does.
    pub fn is_alive(&self) -> bool {
        !self.watcher.is_finished()
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        self.watcher.abort();
        self.styler.abort();
    }
}

/// One session per tab, replaced when the previous one has ended.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<TargetId, PageSession>,
}

impl SessionRegistry {
    /// Make sure `target` has a live session. Returns true if one was started.
    pub fn ensure(
        &mut self,
        target: &TargetId,
        page: Arc<dyn TargetPage>,
        profile: Arc<Profile>,
        events: &broadcast::Sender<HostEvent>,
    ) -> bool {
        self.sessions.retain(|id, session| {
            let alive = session.is_alive();
            if !alive {
                warn!(target_id = %id, "Page session ended, dropping it");
            }
            alive
        });
        if self.sessions.contains_key(target) {
            return false;
        }
        let session = PageSession::start(target.clone(), page, profile, events.clone());
        self.sessions.insert(target.clone(), session);
        true
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Action, FakeNode, FakePage};

    fn status(page: &FakePage, text: &str) {
        let selector = Profile::default().selectors.status_region;
        page.set(&selector, vec![FakeNode::text(text)]);
    }

    #[test]
    fn debounce_opens_again_after_window() {
        let start = Instant::now();
        let mut d = Debounce::new(Duration::from_secs(3));
        assert!(d.try_fire(start));
        assert!(!d.try_fire(start + Duration::from_millis(300)));
        assert!(!d.try_fire(start + Duration::from_millis(2999)));
        assert!(d.try_fire(start + Duration::from_secs(3)));
        assert!(!d.try_fire(start + Duration::from_millis(3100)));
    }

    #[tokio::test(start_paused = true)]
    async fn copy_notification_is_debounced() {
        let page = Arc::new(FakePage::new("app.mockup.studio"));
        status(&page, "Copied to clipboard!");
        let (tx, mut rx) = broadcast::channel(16);
        let watcher = CopyWatcher::new("T1".into(), page.clone(), Arc::new(Profile::default()), tx);
        let handle = tokio::spawn(watcher.watch());

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(page.messages(), vec![COPY_COMPLETE_MESSAGE.to_string()]);
        assert!(matches!(
            rx.try_recv(),
            Ok(HostEvent::CopyComplete { target }) if target == "T1"
        ));
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(page.messages().len(), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_ignores_other_status_text_and_stops_on_detach() {
        let page = Arc::new(FakePage::new("app.mockup.studio"));
        status(&page, "Exporting...");
        let (tx, _rx) = broadcast::channel(16);
        let watcher = CopyWatcher::new("T1".into(), page.clone(), Arc::new(Profile::default()), tx);
        let handle = tokio::spawn(watcher.watch());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(page.messages().is_empty());

        page.detach();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn copy_button_is_styled_once_per_render() {
        let selector = Profile::default().selectors.copy_button;
        let page = Arc::new(FakePage::new("app.mockup.studio"));
        page.set(&selector, vec![FakeNode::text("Copy")]);
        let handle = tokio::spawn(style_copy_button(page.clone(), Arc::new(Profile::default())));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(page.actions().is_empty());

        tokio::time::sleep(Duration::from_millis(7000)).await;
        let decorated = |p: &FakePage| {
            p.actions()
                .iter()
                .filter(|a| matches!(a, Action::Decorate(_)))
                .count()
        };
        assert_eq!(decorated(page.as_ref()), 1);

        // A re-render replaces the button; the new one gets styled too.
        page.set(&selector, vec![FakeNode::text("Copy")]);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(decorated(page.as_ref()), 2);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn session_leaves_foreign_pages_alone_until_editor_returns() {
        let s = Profile::default().selectors;
        let (tx, _rx) = broadcast::channel(16);
        let mut registry = SessionRegistry::default();
        let page = Arc::new(FakePage::new("app.mockup.studio"));
        assert!(registry.ensure(&"T1".into(), page.clone(), Arc::new(Profile::default()), &tx));

        page.navigate("github.com");
        status(&page, "Copied to clipboard");
        page.set(&s.copy_button, vec![FakeNode::text("Copy")]);
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert!(page.actions().is_empty());
        assert_eq!(registry.len(), 1);

        page.navigate("app.mockup.studio");
        tokio::time::sleep(Duration::from_millis(3100)).await;
        let actions = page.actions();
        assert!(actions.contains(&Action::PostMessage(COPY_COMPLETE_MESSAGE.to_string())));
        assert!(actions.iter().any(|a| matches!(a, Action::Decorate(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn registry_restarts_ended_sessions() {
        let profile = Arc::new(Profile::default());
        let (tx, _rx) = broadcast::channel(16);
        let mut registry = SessionRegistry::default();
        let first = Arc::new(FakePage::new("app.mockup.studio"));

        assert!(registry.ensure(&"T1".into(), first.clone(), profile.clone(), &tx));
        assert!(!registry.ensure(&"T1".into(), first.clone(), profile.clone(), &tx));
        assert_eq!(registry.len(), 1);

        first.detach();
        tokio::time::sleep(Duration::from_millis(700)).await;

        let second = Arc::new(FakePage::new("app.mockup.studio"));
        assert!(registry.ensure(&"T1".into(), second, profile, &tx));
        assert_eq!(registry.len(), 1);
    }
}
