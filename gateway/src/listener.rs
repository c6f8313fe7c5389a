//! The HTTP listener: a manual accept loop with one `ChildTask` per connection, plain HTTP only
//! (no TLS pass-through, no raw-TCP tunnel).

use std::net::SocketAddr;

use anyhow::Context as _;
use axum::extract::connect_info::ConnectInfo;
use clickgate_task::{ChildTask, ShutdownSignal, Task};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::GatewayState;

pub struct GatewayListener {
    listener: TcpListener,
    addr: SocketAddr,
    state: GatewayState,
}

impl GatewayListener {
    pub async fn bind(addr: SocketAddr, state: GatewayState) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        info!(%addr, "listener bound");

        Ok(Self { listener, addr, state })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn run(self) -> anyhow::Result<()> {
        let app = crate::make_http_service(self.state);

        loop {
            let (stream, peer_addr) = self
                .listener
                .accept()
                .await
                .context("failed to accept connection")?;

            let app = app.clone().layer(axum::Extension(ConnectInfo(peer_addr)));

            ChildTask::spawn(async move {
                let io = TokioIo::new(stream);
                let service = hyper_util::service::TowerToHyperService::new(app);

                if let Err(error) = hyper_util::server::conn::auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                    .serve_connection(io, service)
                    .await
                {
                    warn!(%peer_addr, %error, "connection error");
                }
            })
            .detach();
        }
    }
}

#[async_trait::async_trait]
impl Task for GatewayListener {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "HTTP listener";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        tokio::select! {
            result = self.run() => result,
            _ = shutdown_signal.wait() => Ok(()),
        }
    }
}
