//! Client for the control RPC.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use super::protocol::{Request, Response, RpcError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Communication error: {0}")]
    Io(#[from] LinesCodecError),
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Connection closed before a response arrived")]
    Closed,
    #[error("Failed to encode or decode message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
}

pub struct RpcClient {
    addr: SocketAddr,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Call `method` on a fresh connection and decode its result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T, ClientError> {
        tokio::time::timeout(self.timeout, self.exchange(method, params))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))?
    }

    async fn exchange<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T, ClientError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: self.addr,
                source,
            })?;
        let mut framed = Framed::new(stream, LinesCodec::new());

        framed
            .send(serde_json::to_string(&Request::new(method, params, 1))?)
            .await?;

        let line = framed.next().await.ok_or(ClientError::Closed)??;
        let response: Response = serde_json::from_str(&line)?;

        if let Some(error) = response.error {
            return Err(ClientError::Rpc(error));
        }
        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }
}
