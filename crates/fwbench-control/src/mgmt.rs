/// Management JSON-RPC client.
///
/// JSON-RPC 2.0 over a plain TCP stream, one request per connection. Responses
/// are not line-delimited, so bytes are accumulated until they parse as one
/// complete JSON value.

use std::time::Duration;

use fwbench_protocol::locator::MgmtLocator;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::RpcError;

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Face id returned by `Face.Create`.
#[derive(Debug, Deserialize)]
struct BasicInfo {
    #[serde(rename = "Id")]
    id: Value,
}

pub struct MgmtClient {
    addr: String,
    timeout: Duration,
}

impl MgmtClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Call `method` and return its result. A JSON-RPC error object becomes
    /// `RpcError::Application` carrying the error serialized as JSON.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        tokio::time::timeout(self.timeout, self.exchange(method, params))
            .await
            .map_err(|_| RpcError::Transport(format!("{method} timed out after {:?}", self.timeout)))?
    }

    async fn exchange(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let transport = |e: std::io::Error| RpcError::Transport(e.to_string());

        let mut stream = TcpStream::connect(&self.addr).await.map_err(transport)?;
        let request = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let body = serde_json::to_vec(&request).map_err(|e| RpcError::Transport(e.to_string()))?;
        debug!(addr = %self.addr, method, "JSON-RPC request");
        stream.write_all(&body).await.map_err(transport)?;

        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 4096];
        let response: Response = loop {
            let n = stream.read(&mut chunk).await.map_err(transport)?;
            if n == 0 {
                return Err(RpcError::Transport("connection closed before response".into()));
            }
            buf.extend_from_slice(&chunk[..n]);
            match serde_json::from_slice(&buf) {
                Ok(resp) => break resp,
                Err(e) if e.is_eof() => continue,
                Err(e) => {
                    return Err(RpcError::MalformedResponse {
                        operation: method.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        };

        match response {
            Response { error: Some(err), .. } if !err.is_null() => Err(RpcError::Application {
                operation: method.to_string(),
                message: err.to_string(),
            }),
            Response { result: Some(result), .. } => Ok(result),
            _ => Err(RpcError::MalformedResponse {
                operation: method.to_string(),
                message: "neither result nor error".into(),
            }),
        }
    }

    /// `Face.Create`; returns the new face id.
    pub async fn create_face(&self, locator: &MgmtLocator) -> Result<String, RpcError> {
        let params = serde_json::to_value(locator).map_err(|e| RpcError::Transport(e.to_string()))?;
        let result = self.call("Face.Create", params).await?;
        let info: BasicInfo = serde_json::from_value(result).map_err(|e| RpcError::MalformedResponse {
            operation: "Face.Create".into(),
            message: e.to_string(),
        })?;
        Ok(match info.id {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve one connection: read the request, answer with `reply` in two
    /// writes so the client must reassemble it.
    async fn serve_once(reply: &'static str) -> (String, tokio::task::JoinHandle<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            let req: Value = serde_json::from_slice(&buf[..n]).unwrap();
            let (head, tail) = reply.split_at(reply.len() / 2);
            sock.write_all(head.as_bytes()).await.unwrap();
            sock.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            sock.write_all(tail.as_bytes()).await.unwrap();
            req
        });
        (addr, handle)
    }

    fn locator() -> MgmtLocator {
        MgmtLocator {
            scheme: "udp".into(),
            local: None,
            port: Some("6363".into()),
            remote: "192.0.2.1".into(),
        }
    }

    #[tokio::test]
    async fn create_face_returns_id() {
        let (addr, server) = serve_once(r#"{"jsonrpc":"2.0","id":1,"result":{"Id":4711}}"#).await;
        let client = MgmtClient::new(addr, Duration::from_secs(5));
        let id = client.create_face(&locator()).await.unwrap();
        assert_eq!(id, "4711");

        let req = server.await.unwrap();
        assert_eq!(req["method"], "Face.Create");
        assert_eq!(req["params"]["Scheme"], "udp");
        assert_eq!(req["params"]["Remote"], "192.0.2.1");
        assert!(req["params"].get("Local").is_none());
    }

    #[tokio::test]
    async fn error_object_is_application_error() {
        let (addr, _server) =
            serve_once(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"no such port"}}"#).await;
        let client = MgmtClient::new(addr, Duration::from_secs(5));
        match client.create_face(&locator()).await {
            Err(RpcError::Application { operation, message }) => {
                assert_eq!(operation, "Face.Create");
                assert!(message.contains("no such port"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let client = MgmtClient::new(addr, Duration::from_secs(5));
        assert!(matches!(client.create_face(&locator()).await, Err(RpcError::Transport(_))));
    }
}
