//! Minimal liveness endpoint for hosts that ping a web port.
//!
//! Every connection gets the same `200 OK` answer regardless of method or
//! path; the request itself is read and discarded.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const LIVENESS_BODY: &str = "Bot is running!";

/// Pause after a failed `accept` (e.g. out of file descriptors).
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Full HTTP/1.1 response sent to every client.
pub fn liveness_response() -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {LIVENESS_BODY}",
        LIVENESS_BODY.len()
    )
}

/// Bind on all interfaces.
pub async fn bind(port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
    info!(addr = %listener.local_addr()?, "keep-alive endpoint listening");
    Ok(listener)
}

/// Accept connections forever, answering each on its own task.
pub fn serve(listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(async move {
                        if let Err(e) = answer(stream).await {
                            debug!(error = %e, peer = %peer, "keep-alive client dropped");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "keep-alive accept failed");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    })
}

async fn answer(mut stream: TcpStream) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    let _ = stream.read(&mut buf).await?;
    stream.write_all(liveness_response().as_bytes()).await?;
    stream.shutdown().await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
