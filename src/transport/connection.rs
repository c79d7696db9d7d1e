//! Connection I/O task.
//!
//! Each physical connection gets one tokio task that owns both halves of the
//! [`Link`]. The task never touches broker state: everything it observes is
//! reported back to the broker's processor as a [`LinkEvent`] tagged with the
//! connection epoch.
//!
//! # Event Loop
//!
//! The task handles:
//!
//! - Incoming frames from the server (forwarded as [`LinkEvent::Received`])
//! - Outgoing frames from the processor (written in submission order)
//! - Link failure or remote close (reported once as [`LinkEvent::Closed`])
//! - Shutdown requested by the processor (closes without reporting)

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::link::{FrameSink, FrameSource, Link};

// ============================================================================
// LinkEvent
// ============================================================================

/// Observation reported by a connection task.
#[derive(Debug)]
pub enum LinkEvent {
    /// A frame arrived.
    Received {
        /// Connection epoch.
        epoch: u64,
        /// Raw frame bytes.
        bytes: Vec<u8>,
    },
    /// The link ended.
    Closed {
        /// Connection epoch.
        epoch: u64,
        /// Failure, or `None` for an orderly remote close.
        error: Option<Error>,
    },
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a frame.
    Send(Vec<u8>),
    /// Close the link.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to a running connection task.
///
/// Dropping the handle closes the link, since the task exits when its
/// command channel closes.
#[derive(Debug)]
pub struct Connection {
    /// Epoch this connection belongs to.
    epoch: u64,
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl Connection {
    /// Spawns the event loop for a freshly connected link.
    pub fn spawn<E>(epoch: u64, link: Link, events: mpsc::UnboundedSender<E>) -> Self
    where
        E: From<LinkEvent> + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::run_event_loop(
            epoch,
            link.sink,
            link.source,
            command_rx,
            events,
        ));

        Self { epoch, command_tx }
    }

    /// Returns the epoch of this connection.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Queues a frame for writing.
    ///
    /// Frames are written in the order they are queued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the task has already exited.
    pub fn send(&self, frame: Vec<u8>) -> Result<()> {
        self.command_tx
            .send(ConnectionCommand::Send(frame))
            .map_err(|_| Error::transport("connection task has exited"))
    }

    /// Closes the link without reporting a [`LinkEvent::Closed`].
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles link I/O.
    async fn run_event_loop<E>(
        epoch: u64,
        mut sink: Box<dyn FrameSink>,
        mut source: Box<dyn FrameSource>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        events: mpsc::UnboundedSender<E>,
    ) where
        E: From<LinkEvent> + Send + 'static,
    {
        let error = loop {
            tokio::select! {
                // Incoming frames from the server
                incoming = source.recv() => {
                    match incoming {
                        Some(Ok(bytes)) => {
                            trace!(epoch, len = bytes.len(), "Frame received");
                            if events.send(LinkEvent::Received { epoch, bytes }.into()).is_err() {
                                debug!(epoch, "Broker gone, closing link");
                                sink.close().await;
                                return;
                            }
                        }

                        Some(Err(e)) => {
                            warn!(epoch, error = %e, "Link read failed");
                            break Some(e);
                        }

                        None => {
                            debug!(epoch, "Link closed by remote");
                            break None;
                        }
                    }
                }

                // Commands from the processor
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(frame)) => {
                            if let Err(e) = sink.send(frame).await {
                                warn!(epoch, error = %e, "Link write failed");
                                break Some(e);
                            }
                        }

                        Some(ConnectionCommand::Shutdown) | None => {
                            debug!(epoch, "Connection shutdown");
                            sink.close().await;
                            return;
                        }
                    }
                }
            }
        };

        sink.close().await;
        let _ = events.send(LinkEvent::Closed { epoch, error }.into());

        debug!(epoch, "Event loop terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::channel_link;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (link, mut remote) = channel_link();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<LinkEvent>();
        let connection = Connection::spawn(3, link, events_tx);

        connection.send(b"one".to_vec()).expect("send");
        connection.send(b"two".to_vec()).expect("send");
        assert_eq!(remote.recv().await.as_deref(), Some(&b"one"[..]));
        assert_eq!(remote.recv().await.as_deref(), Some(&b"two"[..]));

        remote.send(b"reply".to_vec());
        match events_rx.recv().await {
            Some(LinkEvent::Received { epoch, bytes }) => {
                assert_eq!(epoch, 3);
                assert_eq!(bytes, b"reply");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remote_close_reported_once() {
        let (link, remote) = channel_link();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<LinkEvent>();
        let _connection = Connection::spawn(9, link, events_tx);

        drop(remote);
        match events_rx.recv().await {
            Some(LinkEvent::Closed { epoch, error }) => {
                assert_eq!(epoch, 9);
                assert!(error.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_is_silent() {
        let (link, mut remote) = channel_link();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<LinkEvent>();
        let connection = Connection::spawn(1, link, events_tx);

        connection.shutdown();
        // Remote observes the close
        assert!(remote.recv().await.is_none());
        // No Closed event for a local shutdown; the sender is dropped instead
        assert!(events_rx.recv().await.is_none());
    }
}
