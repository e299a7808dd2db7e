use crate::{config::Config, error::MuxError, frame::Frame, session::SessionState};
use bytes::Bytes;
use flume::r#async::SendFut;
use futures::FutureExt;
use std::{
    fmt,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

/// One multiplexed byte-stream channel within a session.
///
/// Implements `AsyncRead` and `AsyncWrite`, so a `Channel` is used exactly
/// like a `TcpStream`. Writes are fragmented into frames of at most the
/// configured payload size; each fragment is handed to the session's egress
/// queue individually, which is what lets concurrent channels interleave.
pub struct Channel {
    id: u32,
    /// Hands frames to the session's egress serializer.
    frame_tx: flume::Sender<Frame>,
    /// Inbound payloads routed here by the session's demux reader.
    data_rx: mpsc::UnboundedReceiver<Bytes>,
    /// Remainder of a chunk the last read only partially consumed.
    current_chunk: Option<Bytes>,
    /// Set once this side has closed the channel.
    local_closed: Arc<AtomicBool>,
    /// Set when the peer sends RST or the session ends.
    remote_closed: Arc<AtomicBool>,
    session: SessionState,
    config: Arc<Config>,
    /// In-flight egress handoff for one data fragment and its length.
    pending_write: Option<(SendFut<'static, Frame>, usize)>,
    /// In-flight egress handoff for the closing RST.
    pending_reset: Option<SendFut<'static, Frame>>,
}

impl Channel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u32,
        frame_tx: flume::Sender<Frame>,
        data_rx: mpsc::UnboundedReceiver<Bytes>,
        local_closed: Arc<AtomicBool>,
        remote_closed: Arc<AtomicBool>,
        session: SessionState,
        config: Arc<Config>,
    ) -> Self {
        Self {
            id,
            frame_tx,
            data_rx,
            current_chunk: None,
            local_closed,
            remote_closed,
            session,
            config,
            pending_write: None,
            pending_reset: None,
        }
    }

    /// The channel identifier. Odd for client-opened channels, even for
    /// server-opened ones.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// True once either side has closed the channel or the session ended.
    pub fn is_closed(&self) -> bool {
        self.local_closed.load(Ordering::Acquire)
            || self.remote_closed.load(Ordering::Acquire)
            || self.session.is_closed()
    }

    /// Close the channel.
    ///
    /// Idempotent: the first call enqueues a single RST for the peer and
    /// marks the channel locally closed; later calls are no-ops. Never
    /// fails: if the session is already gone there is nobody left to tell.
    pub async fn close(&mut self) -> crate::Result<()> {
        if self.local_closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.frame_tx.send_async(Frame::new_rst(self.id)).await;
        Ok(())
    }
}

impl AsyncRead for Channel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        if let Some(chunk) = this.current_chunk.as_mut() {
            let n = chunk.len().min(buf.remaining());
            buf.put_slice(&chunk.split_to(n));
            if chunk.is_empty() {
                this.current_chunk = None;
            }
            return Poll::Ready(Ok(()));
        }

        match this.data_rx.poll_recv(cx) {
            Poll::Ready(Some(mut chunk)) => {
                // The demux reader never delivers empty chunks, so this
                // always copies at least one byte.
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk.split_to(n));
                if !chunk.is_empty() {
                    this.current_chunk = Some(chunk);
                }
                Poll::Ready(Ok(()))
            }
            // Inbound buffer sealed and fully drained: end of stream.
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => {
                // After a local close only already-buffered bytes are
                // readable; an empty buffer is end of stream.
                if this.local_closed.load(Ordering::Acquire) {
                    Poll::Ready(Ok(()))
                } else {
                    Poll::Pending
                }
            }
        }
    }
}

impl AsyncWrite for Channel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();

        loop {
            // Finish handing off the fragment from a previous poll first.
            if let Some((fut, len)) = this.pending_write.as_mut() {
                return match fut.poll_unpin(cx) {
                    Poll::Ready(Ok(())) => {
                        let n = *len;
                        this.pending_write = None;
                        Poll::Ready(Ok(n))
                    }
                    Poll::Ready(Err(_)) => {
                        this.pending_write = None;
                        Poll::Ready(Err(MuxError::SessionClosed.into()))
                    }
                    Poll::Pending => Poll::Pending,
                };
            }

            if this.local_closed.load(Ordering::Acquire)
                || this.remote_closed.load(Ordering::Acquire)
            {
                return Poll::Ready(Err(MuxError::EndOfStream.into()));
            }

            if this.session.is_closed() {
                return Poll::Ready(Err(MuxError::SessionClosed.into()));
            }

            if buf.is_empty() {
                return Poll::Ready(Ok(0));
            }

            let n = buf.len().min(this.config.max_payload_size);
            let frame = Frame::new_data(this.id, Bytes::copy_from_slice(&buf[..n]));
            this.pending_write = Some((this.frame_tx.clone().into_send_async(frame), n));
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        // Fragments are handed straight to the egress task; nothing is
        // buffered here.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        loop {
            if let Some(fut) = this.pending_reset.as_mut() {
                return match fut.poll_unpin(cx) {
                    Poll::Ready(result) => {
                        this.pending_reset = None;
                        this.local_closed.store(true, Ordering::Release);
                        // An enqueue failure means the session is gone;
                        // close still succeeds.
                        let _ = result;
                        Poll::Ready(Ok(()))
                    }
                    Poll::Pending => Poll::Pending,
                };
            }

            if this.local_closed.load(Ordering::Acquire) {
                return Poll::Ready(Ok(()));
            }

            this.pending_reset = Some(
                this.frame_tx
                    .clone()
                    .into_send_async(Frame::new_rst(this.id)),
            );
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // Best effort: tell the peer about a channel the user never closed.
        if !self.local_closed.swap(true, Ordering::AcqRel) {
            let _ = self.frame_tx.try_send(Frame::new_rst(self.id));
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("local_closed", &self.local_closed.load(Ordering::Relaxed))
            .field("remote_closed", &self.remote_closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
