use super::CHUNK_SIZE;
use crate::directory::Catalog;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub struct TransferServer {
    listener: TcpListener,
    catalog: Arc<Catalog>,
}

impl TransferServer {
    pub async fn bind(addr: SocketAddr, catalog: Arc<Catalog>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, catalog))
    }

    pub fn from_listener(listener: TcpListener, catalog: Arc<Catalog>) -> Self {
        Self { listener, catalog }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Spawns the accept loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.accept_loop().await;
        })
    }

    async fn accept_loop(self) {
        tracing::info!("Transfer server listening on {:?}", self.listener.local_addr());

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let catalog = self.catalog.clone();
                    tokio::spawn(async move {
                        match serve_connection(stream, catalog).await {
                            Ok((name, bytes)) => {
                                tracing::debug!("Sent {} ({} bytes) to {}", name, bytes, peer);
                            }
                            Err(e) => {
                                tracing::error!("Transfer to {} failed: {}", peer, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept transfer connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// A request that cannot be served is answered with a reset instead of a clean
/// close, so the puller sees an error rather than an empty file.
async fn serve_connection(mut stream: TcpStream, catalog: Arc<Catalog>) -> Result<(String, u64)> {
    let mut line = String::new();
    BufReader::new(&mut stream).read_line(&mut line).await?;
    let name = line.trim_end_matches(['\r', '\n']).to_string();

    let file = match open_source(&catalog, &name).await {
        Ok(file) => file,
        Err(e) => {
            let _ = stream.set_linger(Some(Duration::ZERO));
            return Err(e);
        }
    };

    let sent = stream_file(file, &mut stream).await?;
    stream.shutdown().await?;
    Ok((name, sent))
}

async fn open_source(catalog: &Catalog, name: &str) -> Result<File> {
    let path = catalog
        .resolve_source(name)
        .ok_or_else(|| anyhow::anyhow!("No local source for {}", name))?;
    tracing::debug!("Transfer request for {} served from {}", name, path.display());

    Ok(File::open(&path).await?)
}

async fn stream_file(mut file: File, stream: &mut TcpStream) -> Result<u64> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut sent = 0u64;

    loop {
        let len = file.read(&mut chunk).await?;
        if len == 0 {
            break;
        }
        stream.write_all(&chunk[..len]).await?;
        sent += len as u64;
    }

    Ok(sent)
}
