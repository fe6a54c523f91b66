//! TCP 后端
//! 客户端连接器，以及把内存存储暴露到网络上的开发服务器

use crate::client::{Connector, KvClient};
use crate::config::Consistency;
use crate::error::{AppError, Result};
use crate::memory::MemoryStore;
use crate::wire::{frame_len, Request, Response};
use compio::BufResult;
use compio::io::{AsyncReadExt, AsyncWriteExt};
use compio::net::{TcpListener, TcpStream};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::io;
use tracing::{debug, info, warn};

/// 读取一帧正文
async fn read_frame(stream: &mut TcpStream) -> io::Result<Vec<u8>> {
    let BufResult(res, header) = stream.read_exact(Vec::with_capacity(4)).await;
    res?;
    let header: [u8; 4] = header
        .as_slice()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "short frame header"))?;
    let len = frame_len(header).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    if len == 0 {
        return Ok(Vec::new());
    }
    let BufResult(res, body) = stream.read_exact(Vec::with_capacity(len)).await;
    res?;
    Ok(body)
}

async fn write_frame(stream: &mut TcpStream, frame: Vec<u8>) -> io::Result<()> {
    let BufResult(res, _) = stream.write_all(frame).await;
    res
}

/// TCP 连接工厂
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Client = TcpClient;

    async fn connect(&self, endpoint: &str) -> Result<TcpClient> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| AppError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        debug!(endpoint, "tcp connection established");
        Ok(TcpClient {
            stream,
            endpoint: endpoint.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// 一条 TCP 连接，请求与响应严格一问一答
pub struct TcpClient {
    stream: TcpStream,
    endpoint: String,
}

impl TcpClient {
    async fn call(&mut self, request: &Request) -> Result<Response> {
        write_frame(&mut self.stream, request.encode()?).await?;
        let body = read_frame(&mut self.stream).await?;
        Response::decode(&body)
    }

    fn unexpected(&self, response: Response) -> AppError {
        AppError::Protocol(format!("unexpected response from {}: {response:?}", self.endpoint))
    }
}

impl KvClient for TcpClient {
    async fn put(&mut self, key: &str, value: &str) -> Result<()> {
        let request = Request::Put {
            key: key.to_string(),
            value: value.to_string(),
        };
        match self.call(&request).await? {
            Response::Ok => Ok(()),
            Response::Error(reason) => Err(AppError::Operation {
                op: "put",
                key: key.to_string(),
                reason,
            }),
            other => Err(self.unexpected(other)),
        }
    }

    async fn get(&mut self, key: &str, consistency: Consistency) -> Result<Option<String>> {
        let request = Request::Get {
            key: key.to_string(),
            consistency,
        };
        match self.call(&request).await? {
            Response::Value(v) => Ok(Some(v)),
            Response::NotFound => Ok(None),
            Response::Error(reason) => Err(AppError::Operation {
                op: "get",
                key: key.to_string(),
                reason,
            }),
            other => Err(self.unexpected(other)),
        }
    }

    async fn delete_prefix(&mut self, prefix: &str) -> Result<u64> {
        let request = Request::DeleteRange {
            prefix: prefix.to_string(),
        };
        match self.call(&request).await? {
            Response::Deleted(n) => Ok(n),
            Response::Error(reason) => Err(AppError::Cleanup {
                prefix: prefix.to_string(),
                reason,
            }),
            other => Err(self.unexpected(other)),
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// 在内存存储上执行一条请求
fn dispatch(store: &MemoryStore, request: Request) -> Response {
    let outcome = match request {
        Request::Put { key, value } => store.apply_put(&key, &value).map(|_| Response::Ok),
        Request::Get { key, consistency } => store
            .apply_get(&key, consistency)
            .map(|v| v.map_or(Response::NotFound, Response::Value)),
        Request::DeleteRange { prefix } => store.apply_delete_prefix(&prefix).map(Response::Deleted),
    };
    outcome.unwrap_or_else(Response::Error)
}

async fn handle_connection(mut stream: TcpStream, store: MemoryStore) -> Result<()> {
    let mut rng = SmallRng::from_rng(&mut rand::rng());
    loop {
        let body = match read_frame(&mut stream).await {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let response = match Request::decode(&body) {
            Ok(request) => {
                store.simulate_latency(&mut rng).await;
                dispatch(&store, request)
            }
            Err(e) => Response::Error(e.to_string()),
        };
        write_frame(&mut stream, response.encode()?).await?;
    }
}

/// 绑定开发服务器的监听地址
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "development server listening");
    Ok(listener)
}

/// 开发服务器主循环，每个连接一个任务
pub async fn serve(listener: TcpListener, store: MemoryStore) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "accepted connection");
        let store = store.clone();
        compio::runtime::spawn(async move {
            if let Err(e) = handle_connection(stream, store).await {
                warn!(%peer, error = %e, "connection closed with error");
            }
        })
        .detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start() -> (String, MemoryStore) {
        start_with(MemoryStore::new()).await
    }

    async fn start_with(store: MemoryStore) -> (String, MemoryStore) {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        compio::runtime::spawn(serve(listener, store.clone())).detach();
        (addr, store)
    }

    #[compio::test]
    async fn server_applies_store_latency() {
        let delay = std::time::Duration::from_millis(20);
        let range = crate::memory::LatencyRange::new(delay, delay).unwrap();
        let (addr, _store) = start_with(MemoryStore::new().with_latency(range)).await;
        let mut client = TcpConnector.connect(&addr).await.unwrap();

        let start = std::time::Instant::now();
        for i in 0..5 {
            client.put(&format!("k{i}"), "v").await.unwrap();
        }
        assert!(start.elapsed() >= delay * 5);
    }

    #[compio::test]
    async fn put_get_delete_over_tcp() {
        let (addr, store) = start().await;
        let mut client = TcpConnector.connect(&addr).await.unwrap();
        assert_eq!(client.endpoint(), addr);

        client.put("pre-1", "one").await.unwrap();
        client.put("pre-2", "two").await.unwrap();
        client.put("other", "three").await.unwrap();
        assert_eq!(
            client.get("pre-2", Consistency::Serializable).await.unwrap().as_deref(),
            Some("two")
        );
        assert_eq!(client.get("missing", Consistency::Linearizable).await.unwrap(), None);
        assert_eq!(client.delete_prefix("pre-").await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().serializable_gets, 1);
    }

    #[compio::test]
    async fn server_errors_surface_as_operation_errors() {
        let (addr, store) = start().await;
        let mut client = TcpConnector.connect(&addr).await.unwrap();
        store.fail_after(0);
        let err = client.put("k", "v").await.unwrap_err();
        assert!(matches!(err, AppError::Operation { op: "put", .. }));

        store.fail_deletes();
        assert!(matches!(
            client.delete_prefix("k").await,
            Err(AppError::Cleanup { .. })
        ));
    }

    #[compio::test]
    async fn connect_refused() {
        // 绑定后立即释放端口，随后的连接应当失败
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(
            TcpConnector.connect(&addr).await,
            Err(AppError::Connect { .. })
        ));
    }
}
