//! TCP front end for a [`ProcRouter`].
//!
//! Each connection is served by its own task. Node operations are synchronous
//! and may block on providers, so they run on the blocking pool.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use procnode_kernel::{FileHandle, OpenFlags, ProcError, ProcRouter};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};

use crate::protocol::{
    encode_attr, encode_data, encode_error, encode_listing, encode_protocol_error, ok_line,
    Request,
};

/// Line protocol server.
pub struct ProcServer {
    listener: TcpListener,
    router: Arc<ProcRouter>,
}

impl ProcServer {
    /// Bind to `addr`. Port 0 picks a free port; see [`Self::local_addr`].
    pub async fn bind(addr: &str, router: Arc<ProcRouter>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> io::Result<()> {
        tracing::info!(addr = %self.local_addr()?, "procnode server listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let router = self.router.clone();
            tokio::spawn(async move {
                tracing::debug!(%peer, "client connected");
                if let Err(e) = handle_connection(stream, router).await {
                    tracing::warn!(%peer, error = %e, "connection failed");
                }
                tracing::debug!(%peer, "client disconnected");
            });
        }
    }
}

type LineReader = Lines<BufReader<OwnedReadHalf>>;

async fn handle_connection(stream: TcpStream, router: Arc<ProcRouter>) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let request = match Request::parse(&line) {
            Ok(request) => request,
            Err(e) => {
                writer.write_all(&encode_protocol_error(&e)).await?;
                continue;
            }
        };
        tracing::debug!(?request, "request");

        let response = match request {
            Request::Quit => break,
            Request::Watch(path) => match watch(&router, path, &mut lines).await? {
                Some(response) => response,
                None => break,
            },
            request => {
                let router = router.clone();
                tokio::task::spawn_blocking(move || execute(&router, request))
                    .await
                    .map_err(io::Error::other)?
            }
        };
        writer.write_all(&response).await?;
    }

    writer.shutdown().await
}

fn execute(router: &ProcRouter, request: Request) -> Vec<u8> {
    let result = match request {
        Request::List(path) => router.list_dir(&path).map(|entries| encode_listing(&entries)),
        Request::Stat(path) => router.stat(&path).map(|attr| encode_attr(&attr)),
        Request::Cat(path) => router.read_all(&path).map(|data| encode_data(&data)),
        Request::Put { path, data } => router
            .write_all(&path, &data)
            .map(|written| ok_line(&written.to_string())),
        Request::Truncate { path, size } => router.truncate(&path, size).map(|()| ok_line("")),
        Request::Watch(_) | Request::Quit => Err(ProcError::unsupported("not a node request")),
    };
    result.unwrap_or_else(|e| encode_error(&e))
}

/// Serve `watch`. Returns `None` when the client went away mid-wait.
///
/// Any input from the client while waiting cancels the watch; the line is
/// discarded.
async fn watch(
    router: &Arc<ProcRouter>,
    path: String,
    lines: &mut LineReader,
) -> io::Result<Option<Vec<u8>>> {
    let open_router = router.clone();
    let open_path = path.clone();
    let opened = tokio::task::spawn_blocking(move || {
        open_router.open(&open_path, OpenFlags::read())
    })
    .await
    .map_err(io::Error::other)?;
    let handle = match opened {
        Ok(handle) => handle,
        Err(e) => return Ok(Some(encode_error(&e))),
    };

    let poll_router = router.clone();
    let mut poll = tokio::task::spawn_blocking(move || poll_router.long_poll_all(handle));

    tokio::select! {
        result = &mut poll => {
            let result = result.map_err(io::Error::other)?;
            close_quietly(router, handle);
            Ok(Some(match result {
                Ok(data) => encode_data(&data),
                Err(e) => encode_error(&e),
            }))
        }
        line = lines.next_line() => {
            // Closing the handle wakes the blocked poll.
            close_quietly(router, handle);
            let _ = poll.await;
            match line? {
                Some(_) => {
                    tracing::debug!(%path, "watch cancelled by client");
                    Ok(Some(encode_error(&ProcError::NoOpenSession)))
                }
                None => Ok(None),
            }
        }
    }
}

fn close_quietly(router: &ProcRouter, handle: FileHandle) {
    match router.close(handle) {
        Ok(()) | Err(ProcError::NoOpenSession) => {}
        Err(e) => tracing::warn!(%handle, error = %e, "closing watch handle failed"),
    }
}
