//! Provider runtime: the small back-end interface and the TCP server glue.
//!
//! A provider process owns one [`ObjectSource`] plus its options, listens
//! on TCP, and answers exactly one line-delimited JSON request per
//! connection. Back-end work (scheduler CLIs, filesystem walks, REST
//! calls) is synchronous and runs on the blocking pool so a slow handler
//! never stalls other connections.

pub mod engine;
pub mod icons;
pub mod search;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::model::ProviderObject;
use crate::protocol::{
    self, IconEntry, Method, SearchParams, error_payload, info_payload, objects_payload,
};

/// How long a connection may take to deliver its single request line.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for one provider instance.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Name shown as the browser's root crumb for this endpoint.
    pub root_name: String,
    /// Directory of `*.png` icon resources advertised via `GetInfo`.
    pub resources_dir: PathBuf,
    /// Base icon filenames that get a synthesized `_IDCard` badge variant.
    pub badge_icons: Vec<String>,
}

impl ProviderOptions {
    pub fn new(root_name: impl Into<String>, resources_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_name: root_name.into(),
            resources_dir: resources_dir.into(),
            badge_icons: Vec::new(),
        }
    }

    pub fn badge_icons(mut self, icons: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.badge_icons = icons.into_iter().map(Into::into).collect();
        self
    }
}

/// The adapter interface a concrete back-end implements.
///
/// `objects_for_path` has a default that routes through the path/command
/// engine; back-ends override it only for special-cased paths and otherwise
/// just supply listings.
pub trait ObjectSource: Send + Sync + 'static {
    /// Listing of the tree root (`/`).
    fn root_objects(&self) -> Result<Vec<ProviderObject>>;

    /// Typed leaves (or sub-trees) at a base path without command tokens.
    fn list_base(&self, base: &str) -> Result<Vec<ProviderObject>>;

    /// Listing restricted to the caller, backing `<ShowMy:user>`.
    fn show_my(&self, _user: &str) -> Result<Vec<ProviderObject>> {
        Ok(Vec::new())
    }

    /// Properties `GroupBy` may aggregate on; `None` allows any.
    fn group_whitelist(&self) -> Option<HashSet<String>> {
        None
    }

    /// Icon stamped onto synthesized group objects.
    fn group_icon(&self) -> String {
        "./resources/Group.png".to_string()
    }

    /// Whether this back-end implements the search sub-protocol.
    fn supports_search(&self) -> bool {
        false
    }

    /// Blocking search executed on a background worker; results are
    /// deduplicated and capped by the search store before delivery.
    fn run_search(&self, _term: &str, _recursive: bool) -> Vec<ProviderObject> {
        Vec::new()
    }

    /// Resolve a full request id (base plus command pipeline).
    fn objects_for_path(&self, path: &str) -> Result<Vec<ProviderObject>> {
        resolve_path(self, path)
    }
}

/// Default id resolution: root listing for `/`, `<ShowMy:user>` routed to
/// the back-end shortcut, everything else through the command engine.
/// Back-ends overriding `objects_for_path` call back into this for the
/// non-special cases.
pub fn resolve_path<S: ObjectSource + ?Sized>(source: &S, path: &str) -> Result<Vec<ProviderObject>> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return source.root_objects();
    }
    let parsed = engine::parse_id(trimmed);
    if parsed.base == "/" {
        if let [engine::Token::ShowMy(user)] = parsed.tokens.as_slice() {
            return source.show_my(user);
        }
    }
    let options = engine::EngineOptions {
        group_icon: source.group_icon(),
        whitelist: source.group_whitelist(),
    };
    engine::evaluate(&parsed.base, &parsed.tokens, &options, |base| {
        source.list_base(base)
    })
}

/// TCP server wrapping one back-end instance.
pub struct ProviderServer {
    source: Arc<dyn ObjectSource>,
    options: ProviderOptions,
    icons: Vec<IconEntry>,
    searches: search::SearchStore,
}

impl ProviderServer {
    /// Assembles the icon catalog once; the resources directory is static
    /// for the process lifetime.
    pub fn new(options: ProviderOptions, source: Arc<dyn ObjectSource>) -> Self {
        let icons = icons::assemble_catalog(&options.resources_dir, &options.badge_icons);
        tracing::info!(
            "provider '{}' serving {} catalog icons",
            options.root_name,
            icons.len()
        );
        Self {
            source,
            options,
            icons,
            searches: search::SearchStore::new(),
        }
    }

    /// Bind and accept forever, one task per connection.
    pub async fn serve(self: Arc<Self>, host: &str, port: u16) -> Result<()> {
        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("cannot bind {host}:{port}"))?;
        tracing::info!(
            "provider '{}' listening on {host}:{port}",
            self.options.root_name
        );
        self.serve_on(listener).await
    }

    /// Accept loop over an already-bound listener.
    pub async fn serve_on(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await.context("accept failed")?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream).await {
                    tracing::warn!("connection from {peer} failed: {err:#}");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let read = tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line))
            .await
            .context("request line timed out")?
            .context("request read failed")?;
        if read == 0 {
            return Ok(()); // peer went away without a request
        }

        let payload = self.dispatch_line(line.trim()).await;
        let mut response = serde_json::to_string(&payload).context("response encoding failed")?;
        response.push('\n');
        write_half
            .write_all(response.as_bytes())
            .await
            .context("response write failed")?;
        Ok(())
    }

    async fn dispatch_line(&self, text: &str) -> Value {
        tracing::debug!("incoming: {text}");
        match serde_json::from_str::<Value>(text) {
            Ok(request) => self.dispatch(request).await,
            Err(_) => error_payload("Invalid JSON"),
        }
    }

    /// Route one parsed request to its handler. Every outcome is a valid
    /// single-line payload; no error escapes the connection handler.
    pub async fn dispatch(&self, request: Value) -> Value {
        match protocol::method_of(&request) {
            Some(Method::GetInfo) => info_payload(&self.options.root_name, &self.icons),
            Some(Method::GetRootObjects) => {
                self.run_listing("Failed to serve objects", |source| source.root_objects())
                    .await
            }
            Some(Method::GetObjects) => {
                let Some(id) = protocol::object_id_of(&request) else {
                    return error_payload("Missing id");
                };
                self.run_listing("Failed to list objects", move |source| {
                    source.objects_for_path(&id)
                })
                .await
            }
            Some(Method::Search) => {
                let Some(params) = SearchParams::from_request(&request) else {
                    return error_payload("Missing search");
                };
                let source = Arc::clone(&self.source);
                let searches = self.searches.clone();
                tokio::task::spawn_blocking(move || searches.handle(source, &params))
                    .await
                    .unwrap_or_else(|err| {
                        tracing::error!("search handler panicked: {err}");
                        error_payload("Search failed")
                    })
            }
            None => error_payload("Unknown message"),
        }
    }

    async fn run_listing<F>(&self, error_prefix: &str, work: F) -> Value
    where
        F: FnOnce(Arc<dyn ObjectSource>) -> Result<Vec<ProviderObject>> + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        match tokio::task::spawn_blocking(move || work(source)).await {
            Ok(Ok(objects)) => objects_payload(&objects),
            Ok(Err(err)) => {
                tracing::warn!("{error_prefix}: {err:#}");
                error_payload(format!("{error_prefix}: {err}"))
            }
            Err(err) => {
                tracing::error!("listing handler panicked: {err}");
                error_payload(format!("{error_prefix}: internal error"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::model::ObjectClass;
    use crate::protocol::objects_of;

    struct StaticSource;

    impl ObjectSource for StaticSource {
        fn root_objects(&self) -> Result<Vec<ProviderObject>> {
            Ok(vec![
                ProviderObject::new(ObjectClass::Directory, "/docs", "docs").count(2),
            ])
        }

        fn list_base(&self, base: &str) -> Result<Vec<ProviderObject>> {
            if base == "/docs" {
                Ok(vec![
                    ProviderObject::new(ObjectClass::File, "/docs/a.txt", "a.txt")
                        .extra("owner", "alice"),
                    ProviderObject::new(ObjectClass::File, "/docs/b.txt", "b.txt")
                        .extra("owner", "bob"),
                ])
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn server() -> ProviderServer {
        ProviderServer::new(
            ProviderOptions::new("Test Tree", "/nonexistent/resources"),
            Arc::new(StaticSource),
        )
    }

    #[tokio::test]
    async fn test_get_info_shape() {
        let response = server().dispatch(json!({"method": "GetInfo"})).await;
        assert_eq!(response["RootName"], "Test Tree");
        assert!(response["icons"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_root_and_path_listings() {
        let server = server();
        let root = server.dispatch(json!({"method": "GetRootObjects"})).await;
        assert_eq!(objects_of(&root).len(), 1);

        // Root listing is also reachable as GetObjects on "/".
        let root_by_id = server
            .dispatch(json!({"method": "GetObjects", "id": "/"}))
            .await;
        assert_eq!(root_by_id, root);

        let listing = server
            .dispatch(json!({"method": "GetObjects", "path": "/docs"}))
            .await;
        assert_eq!(objects_of(&listing).len(), 2);

        let grouped = server
            .dispatch(json!({"method": "GetObjects", "id": "/docs/<GroupBy:owner>"}))
            .await;
        let groups = objects_of(&grouped);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].class, ObjectClass::Group);
        assert_eq!(groups[0].id, "/docs/<Show:owner:alice>");
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let server = server();
        assert_eq!(
            server.dispatch(json!({"method": "Frobnicate"})).await,
            error_payload("Unknown message")
        );
        assert_eq!(
            server.dispatch(json!({"method": "GetObjects"})).await,
            error_payload("Missing id")
        );
        assert_eq!(
            server.dispatch_line("{not json").await,
            error_payload("Invalid JSON")
        );
    }

    #[tokio::test]
    async fn test_search_without_backend_is_empty() {
        let response = server()
            .dispatch(json!({"method": "Search", "id": "/", "search": "x", "recursive": true}))
            .await;
        assert_eq!(response, objects_payload(&[]));
    }

    #[test]
    fn test_default_objects_for_path_routes_show_my() {
        struct MySource;
        impl ObjectSource for MySource {
            fn root_objects(&self) -> Result<Vec<ProviderObject>> {
                Ok(Vec::new())
            }
            fn list_base(&self, _base: &str) -> Result<Vec<ProviderObject>> {
                Ok(Vec::new())
            }
            fn show_my(&self, user: &str) -> Result<Vec<ProviderObject>> {
                Ok(vec![ProviderObject::new(
                    ObjectClass::SlurmJob,
                    format!("/mine/{user}"),
                    user,
                )])
            }
        }
        let mine = MySource.objects_for_path("/<ShowMy:alice>").unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "/mine/alice");
    }
}
