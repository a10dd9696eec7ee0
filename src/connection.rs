//! Per-connection handler (C4): a buffered read/write loop over one accepted
//! socket. The idle deadline bounds both directions: each read races the
//! shutdown signal and the timeout, and each reply write/flush is itself
//! wrapped in the same timeout, so a peer that stops reading can't pin a
//! handler open past shutdown drain.

use crate::store::StoreHandle;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;

pub async fn handle(
    stream: TcpStream,
    peer: SocketAddr,
    store: StoreHandle,
    idle_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let (rd, mut wr) = stream.into_split();
    let mut reader = BufReader::new(rd);
    let mut line = String::new();

    loop {
        if *shutdown.borrow() {
            tracing::info!(%peer, "dropping client connection");
            return;
        }

        line.clear();
        let read_result = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                tracing::info!(%peer, "dropping client connection");
                return;
            }
            res = tokio::time::timeout(idle_timeout, reader.read_line(&mut line)) => res,
        };

        match read_result {
            Ok(Ok(0)) => {
                tracing::debug!(%peer, "client closed connection");
                return;
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                tracing::warn!(%peer, error = %err, "read error");
                return;
            }
            Err(_elapsed) => {
                tracing::info!(%peer, timeout_s = idle_timeout.as_secs(), "idle timeout");
                return;
            }
        }

        let input = line.trim_end_matches('\n');
        tracing::debug!(%peer, input, "serving");

        let (code, err) = store.handle(input).await;
        match &err {
            Some(e) => tracing::info!(%peer, input, error = %e, "fail"),
            None => tracing::debug!(%peer, input, %code, "done"),
        }

        let out = format!("{code}\n");
        let write_result = tokio::time::timeout(idle_timeout, async {
            wr.write_all(out.as_bytes()).await?;
            wr.flush().await
        })
        .await;

        match write_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(%peer, error = %err, "write error");
                return;
            }
            Err(_elapsed) => {
                tracing::info!(%peer, timeout_s = idle_timeout.as_secs(), "idle timeout on write");
                return;
            }
        }
    }
}
