//! Unix domain socket protocol server.
//!
//! Frames are length-delimited protobuf, capped before allocation. The
//! socket is created mode 0600 under a 0700 parent directory; a stale
//! socket file from a previous run is unlinked before bind. One task
//! per connection; the dispatcher itself runs on the blocking pool
//! because secret hashing is CPU-bound.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use prost::Message;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use super::dispatch::Dispatcher;
use super::error::{MAX_FRAME_SIZE, ProtocolError};
use super::messages::{Status, WireRequest, WireResponse};

/// Default socket path: `$XDG_RUNTIME_DIR/warden/warden.sock`, falling
/// back to `/tmp/warden/warden.sock`.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR").map_or_else(
        |_| PathBuf::from("/tmp").join("warden").join("warden.sock"),
        |runtime_dir| PathBuf::from(runtime_dir).join("warden").join("warden.sock"),
    )
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

/// Accept loop over a bound socket.
pub struct ProtocolServer {
    listener: UnixListener,
    dispatcher: Arc<Dispatcher>,
}

impl ProtocolServer {
    /// Binds the socket, replacing any stale file, and locks down
    /// permissions before the first accept.
    ///
    /// # Errors
    ///
    /// I/O failures creating the directory, binding, or setting modes.
    pub fn bind(path: &Path, dispatcher: Arc<Dispatcher>) -> Result<Self, ProtocolError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!(socket = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        info!(socket = %path.display(), "protocol server listening");

        Ok(Self {
            listener,
            dispatcher,
        })
    }

    /// Serves connections until the accept loop fails.
    ///
    /// # Errors
    ///
    /// Accept-level I/O failures. Per-connection failures are logged
    /// and drop only that connection.
    pub async fn run(self) -> Result<(), ProtocolError> {
        loop {
            let (stream, _addr) = self.listener.accept().await?;
            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, dispatcher).await {
                    debug!(error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Serves one connection: decode a frame, dispatch, answer, repeat
/// until the peer hangs up.
async fn handle_connection(
    stream: UnixStream,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), ProtocolError> {
    let mut framed = Framed::new(stream, codec());

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let response = match WireRequest::decode(frame.as_ref()) {
            Ok(request) => {
                let dispatcher = Arc::clone(&dispatcher);
                // Secret hashing is CPU-bound; keep it off the reactor.
                tokio::task::spawn_blocking(move || dispatcher.handle(request))
                    .await
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "dispatch task failed");
                        WireResponse {
                            request_id: 0,
                            status: Status::Internal as i32,
                            message: "dispatch task failed".to_string(),
                            body: None,
                        }
                    })
            }
            Err(e) => WireResponse {
                request_id: 0,
                status: Status::InvalidArgument as i32,
                message: format!("undecodable request: {e}"),
                body: None,
            },
        };
        framed.send(Bytes::from(response.encode_to_vec())).await?;
    }
    Ok(())
}
