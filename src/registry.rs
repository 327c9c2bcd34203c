use crate::BrowserError;
use crate::Result;
use crate::config::EngineConfig;
use crate::supervisor::ProcessSupervisor;
use crate::tab::Tab;
use crate::tab::TabId;
use chromiumoxide::Browser;
use chromiumoxide::cdp::browser_protocol::page::EventWindowOpen;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::CreateBrowserContextParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::cdp::browser_protocol::target::DisposeBrowserContextParams;
use chromiumoxide::cdp::browser_protocol::target::GetTargetInfoParams;
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// LIFO tab discipline: pushing makes a tab active, the active tab is always
/// the top, and removal works anywhere in the stack while preserving the
/// order of the rest.
#[derive(Debug)]
pub(crate) struct TabStack<T> {
    entries: Vec<(TabId, T)>,
}

impl<T: Clone> TabStack<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, id: TabId, value: T) {
        self.entries.push((id, value));
    }

    pub(crate) fn active(&self) -> Option<&T> {
        self.entries.last().map(|(_, value)| value)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove the entry with the given id wherever it sits. Idempotent:
    /// returns false when the id is not present.
    pub(crate) fn remove(&mut self, id: TabId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub(crate) fn into_values(self) -> Vec<T> {
        self.entries.into_iter().map(|(_, value)| value).collect()
    }
}

struct SessionEntry {
    context_id: BrowserContextId,
    tabs: TabStack<Arc<Tab>>,
}

type Sessions = Arc<Mutex<HashMap<String, SessionEntry>>>;

pub(crate) enum TabEventKind {
    Opened,
    Closed(TabId),
}

/// Message from the rendering layer into the registry. Produced by per-tab
/// watcher tasks, consumed by one handler task that mutates the stacks.
pub(crate) struct TabEvent {
    session: String,
    kind: TabEventKind,
}

/// The handler task plus the sender feeding it. Spawned lazily on first use
/// and respawned after a shutdown, so constructing the registry needs no
/// runtime and a shut-down registry stays usable.
struct EventChannel {
    tx: mpsc::UnboundedSender<TabEvent>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Maps a session id to an isolated browser context and its tab stack.
///
/// The registry is event-driven: a page action can spawn a tab the caller
/// never asked for, so watcher tasks feed tab-opened/tab-closed events into
/// an internal channel rather than anything polling browser state.
pub struct SessionRegistry {
    supervisor: Arc<ProcessSupervisor>,
    config: EngineConfig,
    sessions: Sessions,
    /// Per-session cursor visibility, kept outside the entries so a setting
    /// made before the session's first tab still takes effect.
    cursor: Mutex<HashMap<String, bool>>,
    events: Mutex<EventChannel>,
}

impl SessionRegistry {
    pub fn new(supervisor: Arc<ProcessSupervisor>, config: EngineConfig) -> Self {
        // Placeholder channel; the handler task is spawned on first use.
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            supervisor,
            config,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            cursor: Mutex::new(HashMap::new()),
            events: Mutex::new(EventChannel { tx, task: None }),
        }
    }

    /// Sender into a live handler task, spawning or respawning the task if
    /// it is absent or finished.
    pub(crate) async fn event_sender(&self) -> mpsc::UnboundedSender<TabEvent> {
        let mut events = self.events.lock().await;
        let respawn = match &events.task {
            Some(task) => task.is_finished(),
            None => true,
        };
        if respawn {
            let (tx, rx) = mpsc::unbounded_channel();
            let task = tokio::spawn(run_event_loop(
                rx,
                self.supervisor.shared(),
                Arc::clone(&self.sessions),
                self.config.clone(),
                tx.clone(),
            ));
            events.tx = tx;
            events.task = Some(task);
        }
        events.tx.clone()
    }

    /// Return the session's active tab, creating the browser, the session's
    /// context, and one tab on first use.
    pub async fn get_active_tab(&self, session: &str) -> Result<Arc<Tab>> {
        {
            let sessions = self.sessions.lock().await;
            if let Some(entry) = sessions.get(session) {
                if let Some(tab) = entry.tabs.active() {
                    return Ok(Arc::clone(tab));
                }
            }
        }

        let events_tx = self.event_sender().await;
        self.supervisor.ensure().await?;

        let shared = self.supervisor.shared();
        let browser_guard = shared.lock().await;
        let browser = browser_guard.as_ref().ok_or(BrowserError::NotInitialized)?;

        let mut sessions = self.sessions.lock().await;
        // Re-check after re-acquiring: a racing call may have populated it.
        if let Some(entry) = sessions.get(session) {
            if let Some(tab) = entry.tabs.active() {
                return Ok(Arc::clone(tab));
            }
        }

        let context_id = match sessions.get(session) {
            Some(entry) => entry.context_id.clone(),
            None => {
                let resp = browser
                    .execute(CreateBrowserContextParams::default())
                    .await?;
                resp.result.browser_context_id
            }
        };

        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(BrowserError::CdpError)?;
        let page = browser.new_page(params).await?;
        let tab = Arc::new(Tab::new(page, self.config.clone()));

        info!(session = %session, "created session tab");
        let entry = sessions
            .entry(session.to_string())
            .or_insert_with(|| SessionEntry {
                context_id,
                tabs: TabStack::new(),
            });
        entry.tabs.push(tab.id(), Arc::clone(&tab));
        drop(sessions);
        drop(browser_guard);

        spawn_tab_hooks(events_tx, session.to_string(), &tab);
        Ok(tab)
    }

    /// Close the session's active tab. A session must always retain at least
    /// one tab, so closing the only tab is an error, not a no-op crash.
    pub async fn close_active_tab(&self, session: &str) -> Result<()> {
        let tab = {
            let sessions = self.sessions.lock().await;
            let entry = sessions
                .get(session)
                .ok_or_else(|| BrowserError::SessionNotFound(session.to_string()))?;
            if entry.tabs.len() <= 1 {
                return Err(BrowserError::LastTab);
            }
            entry
                .tabs
                .active()
                .map(Arc::clone)
                .ok_or_else(|| BrowserError::SessionNotFound(session.to_string()))?
        };

        tab.close().await?;

        // The close watcher also reports this; removal is idempotent.
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get_mut(session) {
            entry.tabs.remove(tab.id());
        }
        Ok(())
    }

    /// Current stack depth for the session; 0 when the session is unknown.
    pub async fn tab_count(&self, session: &str) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.get(session).map_or(0, |entry| entry.tabs.len())
    }

    pub async fn cursor_visible(&self, session: &str) -> bool {
        self.cursor
            .lock()
            .await
            .get(session)
            .copied()
            .unwrap_or(true)
    }

    /// Takes effect even before the session's first tab exists.
    pub async fn set_cursor_visible(&self, session: &str, visible: bool) {
        self.cursor
            .lock()
            .await
            .insert(session.to_string(), visible);
    }

    /// Close every tab (tolerating per-tab errors), dispose the session's
    /// browser context, and forget the session.
    pub async fn close_session(&self, session: &str) -> Result<()> {
        let entry = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .remove(session)
                .ok_or_else(|| BrowserError::SessionNotFound(session.to_string()))?
        };
        self.cursor.lock().await.remove(session);

        for tab in entry.tabs.into_values() {
            if let Err(e) = tab.close().await {
                warn!(session = %session, "tab close failed: {}", e);
            }
        }

        let shared = self.supervisor.shared();
        let browser_guard = shared.lock().await;
        if let Some(browser) = browser_guard.as_ref() {
            let dispose = DisposeBrowserContextParams::new(entry.context_id);
            if let Err(e) = browser.execute(dispose).await {
                warn!(session = %session, "context dispose failed: {}", e);
            }
        }

        info!(session = %session, "session closed");
        Ok(())
    }

    /// Tear down the shared browser process, invalidating every session.
    /// The registry stays usable; the next session to form respawns the
    /// event handler.
    pub async fn shutdown_all(&self) -> Result<()> {
        self.sessions.lock().await.clear();
        self.cursor.lock().await.clear();
        {
            let mut events = self.events.lock().await;
            if let Some(task) = events.task.take() {
                task.abort();
            }
        }
        self.supervisor.shutdown().await
    }
}

/// Watch one tab: forward window-open signals, and report the tab closed
/// when its event stream terminates (the target is gone).
fn spawn_tab_hooks(tx: mpsc::UnboundedSender<TabEvent>, session: String, tab: &Arc<Tab>) {
    let page = tab.page().clone();
    let tab_id = tab.id();

    tokio::spawn(async move {
        let mut events = match page.event_listener::<EventWindowOpen>().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(session = %session, "window-open listener unavailable: {}", e);
                return;
            }
        };

        while let Some(event) = events.next().await {
            debug!(session = %session, url = %event.url, "page spawned a new tab");
            let _ = tx.send(TabEvent {
                session: session.clone(),
                kind: TabEventKind::Opened,
            });
        }

        let _ = tx.send(TabEvent {
            session,
            kind: TabEventKind::Closed(tab_id),
        });
    });
}

async fn run_event_loop(
    mut rx: mpsc::UnboundedReceiver<TabEvent>,
    shared: Arc<Mutex<Option<Browser>>>,
    sessions: Sessions,
    config: EngineConfig,
    tx: mpsc::UnboundedSender<TabEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event.kind {
            TabEventKind::Opened => {
                adopt_new_tabs(&shared, &sessions, &config, &tx, &event.session).await;
            }
            TabEventKind::Closed(tab_id) => {
                let mut sessions = sessions.lock().await;
                if let Some(entry) = sessions.get_mut(&event.session) {
                    if entry.tabs.remove(tab_id) {
                        info!(session = %event.session, depth = entry.tabs.len(), "tab closed");
                    }
                }
            }
        }
    }
}

/// Targets no session tracks yet that belong to the given browser context.
/// The context check keeps one session's popup from being adopted by another
/// session whose open-signal happened to be handled first.
fn adoptable_targets(
    candidates: &[(TargetId, Option<BrowserContextId>)],
    known: &[TargetId],
    context_id: &BrowserContextId,
) -> Vec<TargetId> {
    candidates
        .iter()
        .filter(|(target, _)| !known.contains(target))
        .filter(|(_, ctx)| ctx.as_ref() == Some(context_id))
        .map(|(target, _)| target.clone())
        .collect()
}

/// Resolve untracked targets in the signalling session's browser context and
/// push them onto its stack. The new tab becomes active immediately; its
/// initial content load is awaited best-effort with a bounded timeout.
async fn adopt_new_tabs(
    shared: &Arc<Mutex<Option<Browser>>>,
    sessions: &Sessions,
    config: &EngineConfig,
    tx: &mpsc::UnboundedSender<TabEvent>,
    session: &str,
) {
    let context_id = {
        let sessions = sessions.lock().await;
        match sessions.get(session) {
            Some(entry) => entry.context_id.clone(),
            None => return,
        }
    };

    // The new target may not be listed yet; retry briefly rather than poll.
    for _ in 0..10 {
        let pages = {
            let guard = shared.lock().await;
            let Some(browser) = guard.as_ref() else {
                return;
            };
            match browser.pages().await {
                Ok(pages) => pages,
                Err(e) => {
                    warn!(session = %session, "target listing failed: {}", e);
                    return;
                }
            }
        };

        let known: Vec<TargetId> = {
            let sessions = sessions.lock().await;
            sessions
                .values()
                .flat_map(|entry| entry.tabs.iter().map(|tab| tab.target().clone()))
                .collect()
        };

        // Owning context per untracked target, so adoption can be scoped to
        // the signalling session.
        let mut candidates = Vec::new();
        let mut by_target = HashMap::new();
        for page in pages {
            let target = page.target_id().clone();
            if known.contains(&target) {
                continue;
            }
            let ctx = {
                let guard = shared.lock().await;
                let Some(browser) = guard.as_ref() else {
                    return;
                };
                let params = GetTargetInfoParams::builder().target_id(target.clone()).build();
                match browser.execute(params).await {
                    Ok(resp) => resp.result.target_info.browser_context_id.clone(),
                    Err(e) => {
                        debug!(session = %session, "target info unavailable: {}", e);
                        None
                    }
                }
            };
            candidates.push((target.clone(), ctx));
            by_target.insert(target, page);
        }

        let adoptable = adoptable_targets(&candidates, &known, &context_id);
        if adoptable.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        }

        for target in adoptable {
            let Some(page) = by_target.remove(&target) else {
                continue;
            };
            let tab = Arc::new(Tab::new(page, config.clone()));
            {
                let mut sessions = sessions.lock().await;
                let Some(entry) = sessions.get_mut(session) else {
                    continue;
                };
                entry.tabs.push(tab.id(), Arc::clone(&tab));
                info!(session = %session, depth = entry.tabs.len(), "adopted new tab");
            }
            spawn_tab_hooks(tx.clone(), session.to_string(), &tab);
            tab.wait_for_load(Duration::from_millis(config.timeouts.new_tab_load_ms))
                .await;
        }
        return;
    }
    debug!(session = %session, "window-open signal without a new target");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(raw: u64) -> TabId {
        TabId::from_raw(raw)
    }

    fn target(raw: &str) -> TargetId {
        TargetId::from(raw.to_string())
    }

    fn context(raw: &str) -> BrowserContextId {
        BrowserContextId::from(raw.to_string())
    }

    #[test]
    fn push_makes_tab_active() {
        let mut stack = TabStack::new();
        stack.push(id(1), "first");
        assert_eq!(stack.active(), Some(&"first"));
        stack.push(id(2), "second");
        assert_eq!(stack.active(), Some(&"second"));
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn closing_in_reverse_order_restores_the_original_tab() {
        let mut stack = TabStack::new();
        stack.push(id(1), "original");
        for n in 2..=5 {
            stack.push(id(n), "spawned");
        }
        for n in (2..=5).rev() {
            assert!(stack.remove(id(n)));
        }
        assert_eq!(stack.active(), Some(&"original"));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn mid_stack_removal_preserves_order() {
        let mut stack = TabStack::new();
        stack.push(id(1), "a");
        stack.push(id(2), "b");
        stack.push(id(3), "c");
        assert!(stack.remove(id(2)));
        assert_eq!(stack.active(), Some(&"c"));
        assert!(stack.remove(id(3)));
        assert_eq!(stack.active(), Some(&"a"));
    }

    #[test]
    fn removal_is_idempotent() {
        let mut stack = TabStack::new();
        stack.push(id(1), "a");
        stack.push(id(2), "b");
        assert!(stack.remove(id(2)));
        assert!(!stack.remove(id(2)));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn empty_stack_has_no_active_tab() {
        let stack: TabStack<&str> = TabStack::new();
        assert!(stack.active().is_none());
        assert!(stack.is_empty());
    }

    #[test]
    fn adoption_is_scoped_to_the_owning_context() {
        // Two sessions spawn popups near-simultaneously; each session must
        // only pick up the popup from its own browser context.
        let known = vec![target("a-main"), target("b-main")];
        let candidates = vec![
            (target("a-popup"), Some(context("ctx-a"))),
            (target("b-popup"), Some(context("ctx-b"))),
            (target("no-ctx"), None),
        ];

        let for_a = adoptable_targets(&candidates, &known, &context("ctx-a"));
        assert_eq!(for_a, vec![target("a-popup")]);

        let for_b = adoptable_targets(&candidates, &known, &context("ctx-b"));
        assert_eq!(for_b, vec![target("b-popup")]);
    }

    #[test]
    fn tracked_targets_are_not_adopted_again() {
        let known = vec![target("main"), target("popup")];
        let candidates = vec![
            (target("main"), Some(context("ctx"))),
            (target("popup"), Some(context("ctx"))),
        ];
        assert!(adoptable_targets(&candidates, &known, &context("ctx")).is_empty());
    }

    #[test]
    fn constructing_the_registry_needs_no_runtime() {
        // Deliberately a plain test: the constructor must not spawn.
        let supervisor = Arc::new(ProcessSupervisor::new(EngineConfig::default()));
        let registry = SessionRegistry::new(supervisor, EngineConfig::default());
        drop(registry);
    }

    #[tokio::test]
    async fn unknown_session_is_reported_not_crashed() {
        let supervisor = Arc::new(ProcessSupervisor::new(EngineConfig::default()));
        let registry = SessionRegistry::new(supervisor, EngineConfig::default());

        assert_eq!(registry.tab_count("ghost").await, 0);
        assert!(matches!(
            registry.close_active_tab("ghost").await,
            Err(BrowserError::SessionNotFound(_))
        ));
        assert!(matches!(
            registry.close_session("ghost").await,
            Err(BrowserError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn cursor_visibility_set_before_first_tab_sticks() {
        let supervisor = Arc::new(ProcessSupervisor::new(EngineConfig::default()));
        let registry = SessionRegistry::new(supervisor, EngineConfig::default());

        assert!(registry.cursor_visible("s").await);
        registry.set_cursor_visible("s", false).await;
        assert!(!registry.cursor_visible("s").await);
        registry.set_cursor_visible("s", true).await;
        assert!(registry.cursor_visible("s").await);
    }

    #[tokio::test]
    async fn shutdown_then_reuse_respawns_the_event_loop() {
        let supervisor = Arc::new(ProcessSupervisor::new(EngineConfig::default()));
        let registry = SessionRegistry::new(supervisor, EngineConfig::default());

        let first = registry.event_sender().await;
        assert!(!first.is_closed());

        registry.shutdown_all().await.unwrap();
        tokio::task::yield_now().await;

        let second = registry.event_sender().await;
        assert!(!second.is_closed());

        // Shutdown is idempotent and the registry keeps answering queries.
        registry.shutdown_all().await.unwrap();
        assert_eq!(registry.tab_count("ghost").await, 0);
    }
}
