//! Gateway server

use crate::body::BoxError;
use crate::mux::ServeMux;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use http::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// HTTP/1.1 and HTTP/2 server in front of a [`ServeMux`]
pub struct GatewayServer {
    mux: Arc<ServeMux>,
}

impl GatewayServer {
    pub fn new(mux: ServeMux) -> Self {
        Self { mux: Arc::new(mux) }
    }

    /// Serve on the given address
    pub async fn serve(self, addr: SocketAddr) -> Result<(), BoxError> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    /// Serve connections accepted from `listener`.
    ///
    /// The peer address of each connection is attached to its requests, so
    /// it can be forwarded as `X-Forwarded-For`.
    pub async fn serve_listener(
        self,
        listener: TcpListener,
    ) -> Result<(), BoxError> {
        info!("rpcgate listening on {}", listener.local_addr()?);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let mux = Arc::clone(&self.mux);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
                    req.extensions_mut().insert(remote_addr);
                    let response = mux.serve(req);
                    async move { Ok::<_, hyper::Error>(response.await) }
                });

                if let Err(err) = auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await
                {
                    error!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::full;
    use crate::pattern::PathParams;
    use crate::template::Template;
    use http::{Method, Response};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_serves_http1_with_peer_address() {
        let mut mux = ServeMux::builder().build().unwrap();
        let pattern = Template::parse("/v1/peer").unwrap().to_pattern().unwrap();
        mux.handle(Method::GET, pattern, |req, _params: PathParams, _state| async move {
            let peer = req
                .extensions()
                .get::<SocketAddr>()
                .map(|addr| addr.ip().to_string())
                .unwrap_or_default();
            Response::new(full(peer))
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(GatewayServer::new(mux).serve_listener(listener));

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET /v1/peer HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        conn.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with("127.0.0.1"), "{response}");
    }
}
