//! Fragmented, serialized transfer over a connected link.
//!
//! A [`PeripheralHandle`] owns one link. Every `send` and `query` takes the
//! handle's lock for its whole duration, so fragments of two frames never
//! interleave on the wire and a query always sees the reply to its own
//! request.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::link::Link;
use crate::responses::{self, StatusFrame, StatusKind};
use crate::tspl::CommandFrame;
use crate::{LabelPrinterError, Result, Stage};

/// Largest ATT MTU a client may request.
pub const MAX_MTU: u16 = 517;

/// ATT MTU every BLE link starts with.
pub const DEFAULT_MTU: u16 = 23;

/// Per-write ATT header overhead.
pub const ATT_OVERHEAD: usize = 3;

/// Shortest valid command (`CLS\r\n`); chunk sizes never go below this.
pub const MIN_CHUNK_SIZE: usize = 5;

/// Notifications above this size are dropped by the backend.
pub const MAX_NOTIFICATION_BYTES: usize = 4096;

/// Capacity of the per-handle notification queue.
pub const NOTIFICATION_QUEUE: usize = 100;

/// Usable payload per write for a negotiated MTU.
pub fn compute_chunk_size(mtu: u16) -> usize {
    (mtu as usize).saturating_sub(ATT_OVERHEAD).max(MIN_CHUNK_SIZE)
}

/// Transport timing settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// MTU requested during negotiation.
    pub requested_mtu: u16,
    pub negotiate_timeout: Duration,
    /// Deadline for a single fragment write.
    pub write_timeout: Duration,
    /// Delay between fragments when the link has no flow control.
    pub chunk_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            requested_mtu: MAX_MTU,
            negotiate_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            chunk_delay: Duration::from_millis(10),
        }
    }
}

/// Connection state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Lazy sequence of `chunk_size`-bounded slices of a frame's bytes.
///
/// Every fragment but the last is exactly `chunk_size` long. Consumed once.
pub struct FragmentStream<'a> {
    bytes: &'a [u8],
    chunk_size: usize,
    offset: usize,
}

impl<'a> FragmentStream<'a> {
    pub fn new(bytes: &'a [u8], chunk_size: usize) -> Self {
        Self {
            bytes,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }

    /// Number of fragments still to be produced.
    pub fn remaining(&self) -> usize {
        (self.bytes.len() - self.offset).div_ceil(self.chunk_size)
    }
}

impl<'a> Iterator for FragmentStream<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.bytes.len());
        let fragment = &self.bytes[self.offset..end];
        self.offset = end;
        Some(fragment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

/// A connected peripheral: link + negotiated MTU + state.
pub struct PeripheralHandle<L: Link> {
    link: L,
    config: TransportConfig,
    notifications: Mutex<mpsc::Receiver<Vec<u8>>>,
    mtu: AtomicU16,
    chunk_size: AtomicUsize,
    connected: AtomicBool,
    dirty: AtomicBool,
}

impl<L: Link> PeripheralHandle<L> {
    /// Wrap a freshly connected link and its notification queue.
    pub fn new(link: L, notifications: mpsc::Receiver<Vec<u8>>, config: TransportConfig) -> Self {
        Self {
            link,
            config,
            notifications: Mutex::new(notifications),
            mtu: AtomicU16::new(DEFAULT_MTU),
            chunk_size: AtomicUsize::new(compute_chunk_size(DEFAULT_MTU)),
            connected: AtomicBool::new(true),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &str {
        self.link.address()
    }

    pub fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Acquire)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::Acquire) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// True when a previous frame was aborted part-way through, leaving the
    /// printer's buffer in an unknown state.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Record that the printer has been re-initialized.
    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Request the largest MTU and adopt what the link accepts.
    pub async fn negotiate_mtu(&self) -> Result<u16> {
        self.ensure_connected()?;
        let requested = self.config.requested_mtu;
        let after = self.config.negotiate_timeout;

        let accepted = match tokio::time::timeout(after, self.link.request_mtu(requested)).await {
            Ok(Ok(mtu)) => mtu.min(requested),
            Ok(Err(e)) => return Err(self.observe(e)),
            Err(_) => {
                return Err(LabelPrinterError::Timeout {
                    stage: Stage::Negotiate,
                    after,
                });
            }
        };

        let chunk_size = compute_chunk_size(accepted);
        self.mtu.store(accepted, Ordering::Release);
        self.chunk_size.store(chunk_size, Ordering::Release);
        tracing::info!(
            address = %self.address(),
            requested,
            mtu = accepted,
            chunk_size,
            "Negotiated MTU"
        );
        Ok(accepted)
    }

    /// Validate `frame` and write it as an ordered run of fragments.
    pub async fn send(&self, frame: &CommandFrame, cancel: &CancellationToken) -> Result<()> {
        frame.validate()?;
        self.ensure_connected()?;
        let bytes = frame.to_bytes();

        let _guard = tokio::select! {
            _ = cancel.cancelled() => return Err(LabelPrinterError::Cancelled),
            guard = self.notifications.lock() => guard,
        };
        self.ensure_connected()?;
        self.write_fragments(&bytes, cancel).await
    }

    /// Send a status query and decode the single notification it elicits.
    ///
    /// On timeout the handle stays connected.
    pub async fn query(
        &self,
        frame: &CommandFrame,
        kind: StatusKind,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<StatusFrame> {
        let reply = self.exchange(frame, deadline, cancel).await?;
        responses::decode(&reply, kind)
    }

    /// Like [`query`](Self::query) but returns the raw reply, or `None` if
    /// the printer stays silent until the deadline.
    pub async fn query_raw(
        &self,
        frame: &CommandFrame,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        match self.exchange(frame, deadline, cancel).await {
            Ok(reply) => Ok(Some(reply)),
            Err(LabelPrinterError::Timeout {
                stage: Stage::Notify,
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Best-effort disconnect. Local state is released even if the remote
    /// side is already gone.
    pub async fn disconnect(&self) {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        self.notifications.lock().await.close();
        if !was_connected {
            tracing::debug!(address = %self.address(), "Handle already disconnected");
        }

        match tokio::time::timeout(self.config.write_timeout, self.link.disconnect()).await {
            Ok(Ok(())) => tracing::info!(address = %self.address(), "Disconnected"),
            Ok(Err(e)) => tracing::warn!(address = %self.address(), error = %e, "Disconnect failed"),
            Err(_) => tracing::warn!(address = %self.address(), "Disconnect timed out"),
        }
    }

    async fn exchange(
        &self,
        frame: &CommandFrame,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        frame.validate()?;
        self.ensure_connected()?;
        let bytes = frame.to_bytes();

        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return Err(LabelPrinterError::Cancelled),
            guard = self.notifications.lock() => guard,
        };
        self.ensure_connected()?;

        let mut stale = 0usize;
        while rx.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(stale, "Dropped stale notifications");
        }

        self.write_fragments(&bytes, cancel).await?;

        tokio::select! {
            _ = cancel.cancelled() => Err(LabelPrinterError::Cancelled),
            reply = tokio::time::timeout(deadline, rx.recv()) => match reply {
                Ok(Some(reply)) => {
                    tracing::debug!(len = reply.len(), reply = %hex::encode(&reply), "Received notification");
                    Ok(reply)
                }
                Ok(None) => {
                    self.connected.store(false, Ordering::Release);
                    tracing::warn!(address = %self.address(), "Notification channel closed");
                    Err(LabelPrinterError::LinkLost("notification channel closed".into()))
                }
                Err(_) => Err(LabelPrinterError::Timeout {
                    stage: Stage::Notify,
                    after: deadline,
                }),
            },
        }
    }

    /// Fragment loop. Caller must hold the notifications lock.
    async fn write_fragments(&self, bytes: &[u8], cancel: &CancellationToken) -> Result<()> {
        let chunk_size = self.chunk_size();
        let fragments = FragmentStream::new(bytes, chunk_size);
        let total = fragments.remaining();
        let was_dirty = self.is_dirty();
        tracing::debug!(
            address = %self.address(),
            total_bytes = bytes.len(),
            chunk_size,
            fragments = total,
            "Writing frame"
        );

        for (i, fragment) in fragments.enumerate() {
            if cancel.is_cancelled() {
                return Err(self.abort(i, total, LabelPrinterError::Cancelled));
            }
            if !self.connected.load(Ordering::Acquire) {
                return Err(self.abort(i, total, LabelPrinterError::NotConnected));
            }

            if i > 0 {
                if self.link.has_flow_control() {
                    let after = self.config.write_timeout;
                    match tokio::time::timeout(after, self.link.ready()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return Err(self.abort(i, total, e)),
                        Err(_) => {
                            let err = LabelPrinterError::Timeout {
                                stage: Stage::Write,
                                after,
                            };
                            return Err(self.abort(i, total, err));
                        }
                    }
                } else {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(self.abort(i, total, LabelPrinterError::Cancelled));
                        }
                        _ = tokio::time::sleep(self.config.chunk_delay) => {}
                    }
                }
            }

            if i == 0 {
                // Stays set if this future is dropped before the last fragment.
                self.dirty.store(true, Ordering::Release);
            }
            let after = self.config.write_timeout;
            match tokio::time::timeout(after, self.link.write_chunk(fragment)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(self.abort(i + 1, total, e)),
                Err(_) => {
                    let err = LabelPrinterError::Timeout {
                        stage: Stage::Write,
                        after,
                    };
                    return Err(self.abort(i + 1, total, err));
                }
            }
        }
        self.dirty.store(was_dirty, Ordering::Release);
        Ok(())
    }

    /// Record a frame that stopped after `attempted` of `total` fragments.
    fn abort(&self, attempted: usize, total: usize, err: LabelPrinterError) -> LabelPrinterError {
        if attempted > 0 {
            self.dirty.store(true, Ordering::Release);
        }
        tracing::warn!(
            address = %self.address(),
            attempted,
            total,
            error = %err,
            "Frame aborted"
        );
        self.observe(err)
    }

    fn observe(&self, err: LabelPrinterError) -> LabelPrinterError {
        if matches!(err, LabelPrinterError::LinkLost(_)) {
            self.connected.store(false, Ordering::Release);
            tracing::warn!(address = %self.address(), "Link lost, handle disconnected");
        }
        err
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(LabelPrinterError::NotConnected)
        }
    }
}
