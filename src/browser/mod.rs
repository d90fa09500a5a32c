//! Browser navigation core.
//!
//! Owns the navigation stack, the current listing, selection and details
//! state, the session icon cache, and deep-link round-tripping. Rendering,
//! terminal spawning, and URL opening stay behind the [`ActionSink`]
//! boundary; the network stays behind [`client::Transport`].

pub mod client;
pub mod icons;
pub mod path;
pub mod shortcut;
pub mod view;

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::model::{ContextMenuEntry, ObjectClass, OpenAction, ProviderObject};
use client::{Endpoint, Transport};
use icons::IconCache;
use path::LinkSegment;
use view::ViewState;

/// Root name shown when a provider cannot be asked for one.
const FALLBACK_ROOT_NAME: &str = "Root";

/// One crumb of the navigation stack.
///
/// `id` is the user-facing path token; `remote_id` is what gets requested
/// when re-entering the crumb. They differ for command tokens and for
/// synthetic crumbs created by a host switch (which land at `/`).
#[derive(Debug, Clone, PartialEq)]
pub struct NavEntry {
    pub id: String,
    pub title: String,
    pub host: String,
    pub port: u16,
    pub remote_id: String,
}

/// External collaborator for open actions: terminal launching, URL
/// opening, and whatever else objects declare.
pub trait ActionSink {
    fn terminal(&mut self, _command: &str) {}
    fn open_url(&mut self, _url: &str) {}
    fn other(&mut self, _action: &OpenAction) {}
}

/// Sink that drops every action.
pub struct NullSink;

impl ActionSink for NullSink {}

/// Result of a (possibly asynchronous) provider search.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    /// Whether the provider reported the search complete.
    pub done: bool,
    pub results: Vec<ProviderObject>,
    /// Polls performed after the initial call.
    pub polls: u32,
}

pub struct Browser {
    transport: Box<dyn Transport>,
    actions: Box<dyn ActionSink>,
    root: Endpoint,
    root_name: String,
    nav: Vec<NavEntry>,
    objects: Vec<ProviderObject>,
    selection: Option<String>,
    details: Option<Value>,
    icon_cache: IconCache,
    /// Endpoints whose `GetInfo` has been merged, with their root names.
    known_endpoints: HashMap<Endpoint, String>,
    pub view: ViewState,
    /// Cadence of search polling.
    pub poll_interval: Duration,
    /// Upper bound on search polls before giving up on a handle.
    pub max_polls: u32,
}

impl Browser {
    /// Connect to the session root and load its listing. Transport
    /// failures leave an empty, usable browser.
    pub fn new(transport: Box<dyn Transport>, actions: Box<dyn ActionSink>, root: Endpoint) -> Self {
        let mut browser = Self {
            transport,
            actions,
            root: root.clone(),
            root_name: FALLBACK_ROOT_NAME.to_string(),
            nav: Vec::new(),
            objects: Vec::new(),
            selection: None,
            details: None,
            icon_cache: IconCache::new(),
            known_endpoints: HashMap::new(),
            view: ViewState::default(),
            poll_interval: Duration::from_secs(1),
            max_polls: 30,
        };
        browser.root_name = browser.ensure_info(&root);
        browser.reload();
        browser
    }

    pub fn objects(&self) -> &[ProviderObject] {
        &self.objects
    }

    pub fn nav(&self) -> &[NavEntry] {
        &self.nav
    }

    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    pub fn current_endpoint(&self) -> Endpoint {
        self.nav
            .last()
            .map(|entry| Endpoint::new(entry.host.clone(), entry.port))
            .unwrap_or_else(|| self.root.clone())
    }

    pub fn current_remote_id(&self) -> &str {
        self.nav.last().map_or("/", |entry| entry.remote_id.as_str())
    }

    /// Breadcrumb labels: root name first, then one per crumb.
    pub fn breadcrumbs(&self) -> Vec<String> {
        std::iter::once(self.root_name.clone())
            .chain(self.nav.iter().map(|entry| entry.title.clone()))
            .collect()
    }

    /// Resolve an object's icon through the session cache.
    pub fn icon_bytes(&self, object: &ProviderObject) -> Option<Vec<u8>> {
        self.icon_cache.resolve(object.icon.as_deref()?)
    }

    /// Fetch `GetInfo` on first contact with an endpoint, merging its icon
    /// catalog; later contacts reuse the cached root name.
    fn ensure_info(&mut self, endpoint: &Endpoint) -> String {
        if let Some(name) = self.known_endpoints.get(endpoint) {
            return name.clone();
        }
        let name = match self.transport.get_info(endpoint) {
            Ok(info) => {
                self.icon_cache.merge(&info.icons);
                if info.root_name.is_empty() {
                    FALLBACK_ROOT_NAME.to_string()
                } else {
                    info.root_name
                }
            }
            Err(err) => {
                tracing::warn!("GetInfo from {endpoint} failed: {err}");
                FALLBACK_ROOT_NAME.to_string()
            }
        };
        self.known_endpoints.insert(endpoint.clone(), name.clone());
        name
    }

    /// Re-fetch the current listing. Every listing change clears the
    /// selection and the details panel; transport failures surface as an
    /// empty listing, never a crash.
    pub fn reload(&mut self) {
        self.selection = None;
        self.details = None;
        let endpoint = self.current_endpoint();
        let remote_id = self.current_remote_id().to_string();
        let result = if remote_id == "/" {
            self.transport.get_root_objects(&endpoint)
        } else {
            self.transport.get_objects(&endpoint, &remote_id)
        };
        self.objects = match result {
            Ok(objects) => objects,
            Err(err) => {
                tracing::warn!("listing {remote_id} from {endpoint} failed: {err}");
                Vec::new()
            }
        };
    }

    /// Select an object by position; populates the details panel.
    pub fn select(&mut self, index: usize) -> bool {
        match self.objects.get(index) {
            Some(object) => {
                self.selection = Some(object.id.clone());
                self.details = Some(object.to_value());
                true
            }
            None => false,
        }
    }

    /// Activate an object by position (double-click semantics).
    pub fn activate(&mut self, index: usize) -> bool {
        match self.objects.get(index).cloned() {
            Some(object) => {
                self.activate_object(object);
                true
            }
            None => false,
        }
    }

    /// Activation rules: an `objectbrowser` open action switches the
    /// endpoint, an enterable object pushes a crumb, and otherwise the
    /// first declared open action runs. Anything else is a no-op.
    fn activate_object(&mut self, object: ProviderObject) {
        let actions = object.open_actions();
        if let Some(switch) = actions.iter().find(|a| a.action == "objectbrowser") {
            self.switch_endpoint(&object, switch.clone());
            return;
        }
        if object.objects > 0 {
            let current = self.current_endpoint();
            self.nav.push(NavEntry {
                id: object.id.clone(),
                title: path::humanize_title(&object.id, &object.title),
                host: current.host,
                port: current.port,
                remote_id: object.id.clone(),
            });
            self.reload();
            return;
        }
        if let Some(action) = actions.first().cloned() {
            self.perform_action(&object, &action);
        }
    }

    /// Traversal variant of activation: descends into enterable objects
    /// (crumb push or endpoint switch) but never fires side-effecting open
    /// actions; those need an explicit `[openaction]` segment.
    fn enter_object(&mut self, object: ProviderObject) {
        let actions = object.open_actions();
        if let Some(switch) = actions.iter().find(|a| a.action == "objectbrowser") {
            self.switch_endpoint(&object, switch.clone());
            return;
        }
        if object.objects > 0 {
            let current = self.current_endpoint();
            self.nav.push(NavEntry {
                id: object.id.clone(),
                title: path::humanize_title(&object.id, &object.title),
                host: current.host,
                port: current.port,
                remote_id: object.id.clone(),
            });
            self.reload();
        }
    }

    /// Push a synthetic crumb at the new provider's root.
    fn switch_endpoint(&mut self, object: &ProviderObject, action: OpenAction) {
        let current = self.current_endpoint();
        let host = action
            .endpoint_host()
            .map(str::to_string)
            .unwrap_or(current.host);
        let port = action.port.unwrap_or(current.port);
        let endpoint = Endpoint::new(host, port);
        let title = self.ensure_info(&endpoint);
        self.nav.push(NavEntry {
            id: object.id.clone(),
            title,
            host: endpoint.host,
            port: endpoint.port,
            remote_id: "/".to_string(),
        });
        self.reload();
    }

    /// Run an object's first open action (deep-link `[openaction]`).
    pub fn perform_openaction(&mut self, object: &ProviderObject) {
        if let Some(action) = object.open_actions().first().cloned() {
            self.perform_action(object, &action);
        }
    }

    fn perform_action(&mut self, object: &ProviderObject, action: &OpenAction) {
        match action.action.as_str() {
            "objectbrowser" => self.switch_endpoint(object, action.clone()),
            "terminal" => {
                if let Some(command) = &action.command {
                    self.actions.terminal(command);
                }
            }
            "browser" => {
                if let Some(url) = &action.url {
                    self.actions.open_url(url);
                }
            }
            _ => self.actions.other(action),
        }
    }

    /// Context-menu entries dispatch exactly like open actions.
    pub fn dispatch_context_entry(&mut self, object: &ProviderObject, entry: &ContextMenuEntry) {
        let action = OpenAction {
            action: entry.action.clone(),
            hostname: None,
            host: None,
            port: None,
            command: entry.command.clone(),
            url: entry.url.clone(),
            rest: entry.rest.clone(),
        };
        self.perform_action(object, &action);
    }

    /// Breadcrumb click: index 0 is the root, index k keeps the first k
    /// crumbs.
    pub fn breadcrumb_click(&mut self, index: usize) {
        if index == 0 {
            self.nav.clear();
        } else if index <= self.nav.len() {
            self.nav.truncate(index);
        } else {
            return;
        }
        self.reload();
    }

    /// Navigate a deep link from the current state. Literal segments
    /// traverse by child match (id suffix or exact title) and traversal
    /// stops at the first mismatch.
    pub fn navigate_to_path(&mut self, link: &str) {
        let mut last_object: Option<ProviderObject> = None;
        let mut at_start = true;
        for segment in path::parse_link(link) {
            match segment {
                LinkSegment::Endpoint(endpoint) => {
                    if at_start {
                        // A leading endpoint token replaces the session root;
                        // anything later pushes a synthetic crumb.
                        at_start = false;
                        self.root = endpoint.clone();
                        self.root_name = self.ensure_info(&endpoint);
                        self.nav.clear();
                    } else {
                        let title = self.ensure_info(&endpoint);
                        self.nav.push(NavEntry {
                            id: format!("[{}:{}]", endpoint.host, endpoint.port),
                            title,
                            host: endpoint.host.clone(),
                            port: endpoint.port,
                            remote_id: "/".to_string(),
                        });
                    }
                    self.reload();
                }
                LinkSegment::Command(token) => {
                    at_start = false;
                    let base = self.current_remote_id();
                    let remote_id = if base == "/" {
                        format!("/{token}")
                    } else {
                        format!("{base}/{token}")
                    };
                    let current = self.current_endpoint();
                    self.nav.push(NavEntry {
                        id: token.clone(),
                        title: path::humanize_token(&token).unwrap_or_else(|| token.clone()),
                        host: current.host,
                        port: current.port,
                        remote_id,
                    });
                    self.reload();
                }
                LinkSegment::OpenAction => {
                    at_start = false;
                    if let Some(object) = last_object.take() {
                        self.perform_openaction(&object);
                    }
                }
                LinkSegment::Literal(name) => {
                    at_start = false;
                    let suffix = format!("/{name}");
                    let child = self
                        .objects
                        .iter()
                        .find(|o| o.id.ends_with(&suffix) || o.title == name)
                        .cloned();
                    let Some(child) = child else {
                        tracing::warn!("deep link stopped: no child matches '{name}'");
                        break;
                    };
                    last_object = Some(child.clone());
                    self.enter_object(child);
                }
            }
        }
    }

    /// Minimal deep link reproducing the current navigation state.
    pub fn shortcut_path(&self) -> String {
        path::build_link(&self.root, &self.nav)
    }

    /// Run a provider search at the current path. Providers answering with
    /// a handle are polled at `poll_interval` (the handle object carried
    /// forward verbatim) until done or `max_polls` is exhausted; navigating
    /// away simply means not calling this again, which stops polling.
    pub fn search(&mut self, term: &str, recursive: bool) -> SearchOutcome {
        let endpoint = self.current_endpoint();
        let id = self.current_remote_id().to_string();
        let initial = match self.transport.search(&endpoint, &id, term, recursive, None) {
            Ok(objects) => objects,
            Err(err) => {
                tracing::warn!("search at {endpoint} failed: {err}");
                return SearchOutcome::default();
            }
        };

        let is_handle = initial
            .first()
            .is_some_and(|o| o.class == ObjectClass::LmodSearchHandle);
        if !is_handle {
            // Synchronous provider: the listing is the result set.
            return SearchOutcome {
                done: true,
                results: initial,
                polls: 0,
            };
        }
        let handle = initial[0].to_value();

        for polls in 1..=self.max_polls {
            std::thread::sleep(self.poll_interval);
            let objects = match self
                .transport
                .search(&endpoint, &id, term, recursive, Some(&handle))
            {
                Ok(objects) => objects,
                Err(err) => {
                    tracing::warn!("search poll at {endpoint} failed: {err}");
                    return SearchOutcome {
                        done: false,
                        results: Vec::new(),
                        polls,
                    };
                }
            };
            let state = objects
                .first()
                .filter(|o| o.class == ObjectClass::LmodSearchProgress)
                .and_then(|o| o.property("state"));
            if state.as_deref() == Some("done") {
                return SearchOutcome {
                    done: true,
                    results: objects.into_iter().skip(1).collect(),
                    polls,
                };
            }
        }
        SearchOutcome {
            done: false,
            results: Vec::new(),
            polls: self.max_polls,
        }
    }
}
