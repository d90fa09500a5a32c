//! Client transport: one TCP connection per RPC, one JSON line each way.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use crate::model::ProviderObject;
use crate::protocol::{self, ProviderInfo};

/// Connect/read/write budget for one RPC.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// A provider endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot reach {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request to {endpoint} failed: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{endpoint} answered with an error: {message}")]
    Provider { endpoint: String, message: String },
}

/// The seam between the navigation core and the network. The browser only
/// ever talks through this trait, so tests drive navigation against an
/// in-memory implementation.
pub trait Transport {
    /// Send one request body and return the parsed response line.
    fn request(&self, endpoint: &Endpoint, body: &Value) -> Result<Value, TransportError>;

    fn get_info(&self, endpoint: &Endpoint) -> Result<ProviderInfo, TransportError> {
        let response = self.request(endpoint, &json!({"method": "GetInfo"}))?;
        Ok(ProviderInfo::from_response(&response))
    }

    fn get_root_objects(&self, endpoint: &Endpoint) -> Result<Vec<ProviderObject>, TransportError> {
        let response = self.request(endpoint, &json!({"method": "GetRootObjects"}))?;
        objects_or_error(endpoint, response)
    }

    fn get_objects(
        &self,
        endpoint: &Endpoint,
        id: &str,
    ) -> Result<Vec<ProviderObject>, TransportError> {
        let response = self.request(endpoint, &protocol::get_objects_request(id))?;
        objects_or_error(endpoint, response)
    }

    fn search(
        &self,
        endpoint: &Endpoint,
        id: &str,
        term: &str,
        recursive: bool,
        search_handle: Option<&Value>,
    ) -> Result<Vec<ProviderObject>, TransportError> {
        let body = protocol::search_request(id, term, recursive, search_handle);
        let response = self.request(endpoint, &body)?;
        objects_or_error(endpoint, response)
    }
}

fn objects_or_error(
    endpoint: &Endpoint,
    response: Value,
) -> Result<Vec<ProviderObject>, TransportError> {
    if let Some(message) = response.get("error").and_then(Value::as_str) {
        return Err(TransportError::Provider {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        });
    }
    Ok(protocol::objects_of(&response))
}

/// The real transport.
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            timeout: RPC_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn request(&self, endpoint: &Endpoint, body: &Value) -> Result<Value, TransportError> {
        let connect = |endpoint: &Endpoint| -> std::io::Result<TcpStream> {
            let address = (endpoint.host.as_str(), endpoint.port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "address did not resolve")
                })?;
            let stream = TcpStream::connect_timeout(&address, self.timeout)?;
            stream.set_read_timeout(Some(self.timeout))?;
            stream.set_write_timeout(Some(self.timeout))?;
            Ok(stream)
        };

        let mut stream = connect(endpoint).map_err(|source| TransportError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;

        let io_err = |source| TransportError::Io {
            endpoint: endpoint.to_string(),
            source,
        };

        let mut line = serde_json::to_string(body).map_err(|source| TransportError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })?;
        line.push('\n');
        stream.write_all(line.as_bytes()).map_err(io_err)?;

        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        reader.read_line(&mut response).map_err(io_err)?;

        serde_json::from_str(response.trim()).map_err(|source| TransportError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use anyhow::Result;

    use crate::model::ObjectClass;
    use crate::provider::{ObjectSource, ProviderOptions, ProviderServer};

    struct StaticSource;

    impl ObjectSource for StaticSource {
        fn root_objects(&self) -> Result<Vec<ProviderObject>> {
            Ok(vec![
                ProviderObject::new(ObjectClass::Directory, "/docs", "docs").count(1),
            ])
        }

        fn list_base(&self, base: &str) -> Result<Vec<ProviderObject>> {
            if base == "/docs" {
                Ok(vec![ProviderObject::new(
                    ObjectClass::File,
                    "/docs/a.txt",
                    "a.txt",
                )])
            } else {
                Ok(Vec::new())
            }
        }
    }

    /// Run a real provider server on an ephemeral port for the duration of
    /// the test process.
    fn spawn_server() -> Endpoint {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Runtime::new().expect("runtime");
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
                    .await
                    .expect("bind");
                tx.send(listener.local_addr().expect("addr").port())
                    .expect("send port");
                let server = Arc::new(ProviderServer::new(
                    ProviderOptions::new("Static Tree", "/nonexistent"),
                    Arc::new(StaticSource),
                ));
                let _ = server.serve_on(listener).await;
            });
        });
        Endpoint::new("127.0.0.1", rx.recv().expect("port"))
    }

    #[test]
    fn test_round_trip_against_live_provider() {
        let endpoint = spawn_server();
        let transport = TcpTransport::new();

        let info = transport.get_info(&endpoint).unwrap();
        assert_eq!(info.root_name, "Static Tree");

        let root = transport.get_root_objects(&endpoint).unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].id, "/docs");

        let listing = transport.get_objects(&endpoint, "/docs").unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].title, "a.txt");

        // Error payloads surface as typed provider errors.
        let err = transport
            .request(&endpoint, &json!({"method": "GetObjects"}))
            .map(|v| objects_or_error(&endpoint, v));
        match err {
            Ok(Err(TransportError::Provider { message, .. })) => {
                assert_eq!(message, "Missing id");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn test_connect_failure_is_typed() {
        let transport = TcpTransport::with_timeout(Duration::from_millis(500));
        // Port 1 on localhost is essentially never listening.
        let endpoint = Endpoint::new("127.0.0.1", 1);
        let result = transport.get_root_objects(&endpoint);
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
