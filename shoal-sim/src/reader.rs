//! Blocking reader over a simulated transfer.

use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use shoal_core::EngineReader;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use crate::transfer::SimTransfer;

/// Reader over a simulated transfer's byte space.
///
/// A read stays pending until the piece under the cursor has been fetched.
/// While open, the reader's position and readahead steer piece selection.
pub struct SimReader {
    transfer: Weak<SimTransfer>,
    id: u64,
    position: u64,
    closed: bool,
}

impl SimReader {
    pub(crate) fn new(transfer: Weak<SimTransfer>, id: u64) -> Self {
        Self {
            transfer,
            id,
            position: 0,
            closed: false,
        }
    }

    fn released() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "simulated transfer released")
    }
}

impl AsyncRead for SimReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(Err(io::Error::other("reader is closed")));
        }
        let Some(transfer) = this.transfer.upgrade() else {
            return Poll::Ready(Err(Self::released()));
        };
        let Some(entry) = transfer.entry().cloned() else {
            return Poll::Ready(Err(io::Error::other("content has no metadata")));
        };

        let piece_length = transfer.piece_length();
        let mut state = transfer.state.lock();
        if state.dropped {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "transfer dropped",
            )));
        }

        let total = entry.total_length();
        if this.position >= total || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let piece = (this.position / piece_length) as usize;
        let ready = state.metadata && state.completed.get(piece).copied().unwrap_or(false);
        if !ready {
            if let Some(interest) = state.readers.get_mut(&this.id) {
                interest.position = this.position;
                interest.waker = Some(cx.waker().clone());
            }
            return Poll::Pending;
        }

        let piece_end = ((piece as u64 + 1) * piece_length).min(total);
        let count = (piece_end - this.position).min(buf.remaining() as u64) as usize;
        let start = this.position as usize;
        buf.put_slice(&entry.data()[start..start + count]);
        this.position += count as u64;

        if let Some(interest) = state.readers.get_mut(&this.id) {
            interest.position = this.position;
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for SimReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let transfer = this.transfer.upgrade().ok_or_else(Self::released)?;
        let total = transfer.entry().map_or(0, |entry| entry.total_length());

        let target = match position {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => this.position.checked_add_signed(delta),
            SeekFrom::End(delta) => total.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;

        this.position = target;
        if let Some(interest) = transfer.state.lock().readers.get_mut(&this.id) {
            interest.position = target;
        }
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.position))
    }
}

impl EngineReader for SimReader {
    fn set_readahead(&mut self, bytes: u64) {
        if let Some(transfer) = self.transfer.upgrade()
            && let Some(interest) = transfer.state.lock().readers.get_mut(&self.id)
        {
            interest.readahead = bytes;
        }
    }

    fn set_responsive(&mut self) {
        if let Some(transfer) = self.transfer.upgrade()
            && let Some(interest) = transfer.state.lock().readers.get_mut(&self.id)
        {
            interest.responsive = true;
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(transfer) = self.transfer.upgrade() {
            transfer.unregister_reader(self.id);
        }
    }
}

impl Drop for SimReader {
    fn drop(&mut self) {
        self.close();
    }
}
