use std::fmt;
use std::io::{Read, Write};
use std::mem;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::buffer::{BufferError, DynBuf};
use crate::codec::{BodyLength, RequestHeadDecoder, encode_chunk, encode_last_chunk, encode_response};
use crate::connection::mode::{BodyProgress, Mode};
use crate::connection::{ConnectionId, ConnectionState, Context};
use crate::platform::{Flash, FlashError, Platform, ScriptEngine, Transport, TransportError, TransportOf};
use crate::protocol::{ConnectionError, RequestHead, ResponseStatus};

/// Delay between closing the connection that asked for a restart and the restart,
/// so the close handshake can finish.
pub(crate) const RESTART_DELAY: Duration = Duration::from_millis(300);

/// One accepted connection of the device API.
///
/// The connection serves exactly one request. Its accumulation buffer first
/// collects the request head, then whatever body the route buffers, and finally
/// holds the response while it is handed to the transport one send window at a
/// time.
pub(crate) struct ApiConnection<P: Platform> {
    pub(super) id: ConnectionId,
    pub(super) transport: TransportOf<P>,
    pub(super) buf: DynBuf,
    decoder: RequestHeadDecoder,
    body: BodyProgress,
    send_cursor: usize,
    pub(super) request: Option<RequestHead>,
    pub(super) mode: Mode<P>,
    response_sent: bool,
    close_pending: bool,
}

impl<P: Platform> ApiConnection<P> {
    pub(crate) fn new(id: ConnectionId, transport: TransportOf<P>, buffer_limit: Option<usize>) -> Self {
        Self {
            id,
            transport,
            buf: buffer_limit.map_or_else(DynBuf::new, DynBuf::with_limit),
            decoder: RequestHeadDecoder::new(),
            body: BodyProgress::AwaitingHead,
            send_cursor: 0,
            request: None,
            mode: Mode::ProcessingRequest,
            response_sent: false,
            close_pending: false,
        }
    }

    /// Handles the segments of one receive notification, strictly in order.
    pub(crate) fn on_receive<'s, I>(&mut self, ctx: &mut Context<'_, P>, segments: I) -> Result<ConnectionState, ConnectionError>
    where
        I: IntoIterator<Item = &'s [u8]>,
    {
        let mut received = 0;
        for segment in segments {
            received += segment.len();
            if self.close_pending || self.response_sent {
                trace!(id = %self.id, len = segment.len(), "discarding received bytes");
                continue;
            }
            self.process_segment(ctx, segment)?;
        }
        self.transport.recved(received);

        if self.close_pending {
            debug!(id = %self.id, "retrying close");
            return Ok(self.close(ctx));
        }
        Ok(ConnectionState::Open)
    }

    /// The transport acknowledged `len` bytes and has room for more.
    pub(crate) fn on_sent(&mut self, ctx: &mut Context<'_, P>, len: usize) -> Result<ConnectionState, ConnectionError> {
        trace!(id = %self.id, len, mode = self.mode.name(), "sent");
        if self.close_pending {
            return Ok(ConnectionState::Open);
        }

        if matches!(self.mode, Mode::SendingResponse { .. }) {
            self.pump_send()?;
        }
        if matches!(self.mode, Mode::SendingChunked(_)) {
            self.produce_chunk(ctx)?;
        }

        let finished = match self.mode {
            Mode::FileRead(_) => self.send_file_part()?,
            Mode::FlashRead { .. } => self.send_flash_part(ctx)?,
            Mode::SendingResponse { .. } | Mode::SendingChunked(_) => false,
            _ => true,
        };

        if finished {
            return Ok(self.close(ctx));
        }
        Ok(ConnectionState::Open)
    }

    /// The peer finished sending.
    ///
    /// A response in progress is still delivered; otherwise the connection closes.
    pub(crate) fn on_peer_closed(&mut self, ctx: &mut Context<'_, P>) -> ConnectionState {
        if self.response_sent && !self.close_pending {
            debug!(id = %self.id, mode = self.mode.name(), "peer closed while responding");
            return ConnectionState::Open;
        }
        self.close(ctx)
    }

    /// The transport failed and is already gone; only local resources are released.
    pub(crate) fn on_error(&mut self, ctx: &mut Context<'_, P>) {
        warn!(id = %self.id, mode = self.mode.name(), "transport error");
        self.release(ctx);
    }

    /// Drops the connection immediately, releasing everything it holds.
    pub(crate) fn abort(&mut self, ctx: &mut Context<'_, P>) {
        self.transport.abort();
        self.release(ctx);
    }

    /// Gracefully closes the transport.
    ///
    /// A socket that cannot close yet keeps the connection open with a pending
    /// close that is retried on the next receive notification.
    pub(crate) fn close(&mut self, ctx: &mut Context<'_, P>) -> ConnectionState {
        match self.transport.close() {
            Ok(()) => {}
            Err(TransportError::Busy) => {
                debug!(id = %self.id, "socket not closable yet");
                self.close_pending = true;
                return ConnectionState::Open;
            }
            Err(e) => {
                warn!(id = %self.id, cause = %e, "close failed, aborting");
                self.transport.abort();
            }
        }

        if matches!(self.mode, Mode::RestartPending) {
            info!(id = %self.id, delay = ?RESTART_DELAY, "scheduling device restart");
            ctx.platform.schedule_restart(RESTART_DELAY);
        }
        self.release(ctx);
        debug!(id = %self.id, "connection closed");
        ConnectionState::Closed
    }

    fn release(&mut self, ctx: &mut Context<'_, P>) {
        mem::replace(&mut self.mode, Mode::Closing).release(ctx.platform.script());
        self.buf.free();
        self.request = None;
        self.close_pending = false;
    }

    fn process_segment(&mut self, ctx: &mut Context<'_, P>, segment: &[u8]) -> Result<(), ConnectionError> {
        match self.body {
            BodyProgress::AwaitingHead => {
                self.buf.append(segment)?;
                let Some(head) = self.decoder.decode(&mut self.buf)? else {
                    return Ok(());
                };

                let declared = head.content_length();
                let buffered = self.buf.len() as u64;
                if buffered > declared {
                    trace!(id = %self.id, extra = buffered - declared, "dropping bytes beyond the declared body");
                    let keep = usize::try_from(declared).unwrap_or(usize::MAX);
                    self.buf.replace(keep, self.buf.len() - keep, &[])?;
                }
                self.body = BodyProgress::remaining(declared.saturating_sub(buffered));

                self.route(ctx, head)?;
            }
            BodyProgress::Remaining(remaining) => {
                let take = usize::try_from(remaining).map_or(segment.len(), |remaining| remaining.min(segment.len()));
                self.body = BodyProgress::remaining(remaining - take as u64);
                self.consume_body(ctx, &segment[..take])?;
            }
            BodyProgress::Complete => {
                trace!(id = %self.id, len = segment.len(), "discarding bytes after the body");
                return Ok(());
            }
        }

        if self.body == BodyProgress::Complete {
            self.finalize(ctx)?;
        }
        Ok(())
    }

    fn consume_body(&mut self, ctx: &mut Context<'_, P>, data: &[u8]) -> Result<(), ConnectionError> {
        match &mut self.mode {
            Mode::FileWrite(file) => file.write_all(data)?,
            Mode::FlashWrite(session) => session.write(ctx.platform.flash(), data)?,
            Mode::AwaitingScript(_) => self.buf.append(data)?,
            mode => trace!(id = %self.id, len = data.len(), mode = mode.name(), "ignoring body bytes"),
        }
        Ok(())
    }

    /// Runs the route's terminal action once the whole body is in.
    fn finalize(&mut self, ctx: &mut Context<'_, P>) -> Result<(), ConnectionError> {
        match mem::replace(&mut self.mode, Mode::ProcessingRequest) {
            Mode::FileWrite(mut file) => {
                file.flush()?;
                debug!(id = %self.id, "file upload complete");
            }
            Mode::FlashWrite(session) => {
                let written = session.finish(ctx.platform.flash())?;
                debug!(id = %self.id, written, "flash upload complete");
            }
            Mode::AwaitingScript(job) => self.run_script(ctx, job)?,
            other => self.mode = other,
        }

        if !self.response_sent {
            let status = if matches!(self.mode, Mode::NotFound) { ResponseStatus::NotFound } else { ResponseStatus::Ok };
            self.respond(status, None, BodyLength::None, None)?;
        }
        Ok(())
    }

    /// Builds a complete response in the buffer and starts sending it.
    pub(super) fn respond(
        &mut self,
        status: ResponseStatus,
        content_type: Option<&str>,
        length: BodyLength,
        body: Option<&[u8]>,
    ) -> Result<(), ConnectionError> {
        debug!(id = %self.id, ?status, content_type, ?length, "responding");
        encode_response(&mut self.buf, status, content_type, length, body)?;
        self.start_send()
    }

    /// Hands the buffer to the transport; the current mode resumes once it is sent.
    pub(super) fn start_send(&mut self) -> Result<(), ConnectionError> {
        let resume = mem::replace(&mut self.mode, Mode::Closing);
        self.mode = Mode::SendingResponse { resume: Box::new(resume) };
        self.send_cursor = 0;
        self.response_sent = true;
        self.pump_send()
    }

    fn pump_send(&mut self) -> Result<(), ConnectionError> {
        let remaining = self.buf.len() - self.send_cursor;
        if remaining == 0 {
            self.buf.free();
            self.send_cursor = 0;
            self.mode = match mem::replace(&mut self.mode, Mode::Closing) {
                Mode::SendingResponse { resume } => *resume,
                other => other,
            };
            trace!(id = %self.id, mode = self.mode.name(), "response buffer sent");
            return Ok(());
        }

        let len = remaining.min(self.transport.send_window());
        if len > 0 {
            self.transport.write(&self.buf.as_slice()[self.send_cursor..self.send_cursor + len])?;
            self.send_cursor += len;
        }
        Ok(())
    }

    /// Asks the response producer for the next chunk.
    ///
    /// Anything but a non-empty string ends the stream with the terminating chunk,
    /// after which the connection closes.
    fn produce_chunk(&mut self, ctx: &mut Context<'_, P>) -> Result<(), ConnectionError> {
        let Mode::SendingChunked(producer) = &self.mode else {
            return Ok(());
        };

        let script = ctx.platform.script();
        let values = match script.call(&producer.function, producer.param.as_slice()) {
            Ok(values) => values,
            Err(e) => {
                script.recover();
                return Err(e.into());
            }
        };

        let mut chunk = None;
        for (index, value) in values.into_iter().enumerate() {
            if index == 0
                && let Some(bytes) = value.to_bytes()
                && !bytes.is_empty()
            {
                chunk = Some(bytes);
            }
            script.release_value(value);
        }

        match chunk {
            Some(data) => {
                trace!(id = %self.id, len = data.len(), "sending chunk");
                encode_chunk(&mut self.buf, &data)?;
            }
            None => {
                debug!(id = %self.id, "response producer finished");
                mem::replace(&mut self.mode, Mode::Closing).release(script);
                encode_last_chunk(&mut self.buf)?;
            }
        }
        self.start_send()
    }

    /// Sends up to one send window of the file; `true` once the file is exhausted.
    fn send_file_part(&mut self) -> Result<bool, ConnectionError> {
        let Mode::FileRead(file) = &mut self.mode else {
            return Ok(true);
        };

        let window = self.transport.send_window();
        if window == 0 {
            return Ok(false);
        }

        let mut data = allocate(window)?;
        Read::by_ref(file).take(window as u64).read_to_end(&mut data)?;
        if data.is_empty() {
            debug!(id = %self.id, "file sent");
            self.mode = Mode::Closing;
            return Ok(true);
        }

        self.transport.write(&data)?;
        Ok(false)
    }

    /// Sends the next whole flash read units that fit the send window.
    ///
    /// A remainder shorter than a read unit is read as a full unit of which only
    /// the remainder is sent.
    fn send_flash_part(&mut self, ctx: &mut Context<'_, P>) -> Result<bool, ConnectionError> {
        let Mode::FlashRead { offset, remaining } = &mut self.mode else {
            return Ok(true);
        };
        if *remaining == 0 {
            debug!(id = %self.id, "flash range sent");
            return Ok(true);
        }

        let unit = <P::Flash as Flash>::READ_UNIT;
        let window = self.transport.send_window();
        let remaining_len = *remaining as usize;
        let (read_len, send_len) = if remaining_len >= unit {
            let len = window.min(remaining_len);
            let len = len - len % unit;
            (len, len)
        } else {
            (unit, remaining_len)
        };
        if send_len == 0 || send_len > window {
            trace!(id = %self.id, window, "send window smaller than a flash read unit");
            return Ok(false);
        }

        let mut data = allocate(read_len)?;
        data.resize(read_len, 0);
        let next = u32::try_from(read_len).ok().and_then(|len| offset.checked_add(len));
        let next = next.ok_or(FlashError::OutOfRange { offset: *offset })?;
        ctx.platform.flash().read(*offset, &mut data)?;
        self.transport.write(&data[..send_len])?;

        *offset = next;
        *remaining -= send_len as u32;
        Ok(false)
    }

    #[cfg(test)]
    pub(crate) fn mode_name(&self) -> &'static str {
        self.mode.name()
    }
}

/// An empty vector able to hold `len` bytes without reallocating.
fn allocate(len: usize) -> Result<Vec<u8>, BufferError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|e| {
        error!(requested = len, cause = %e, "allocation failed");
        BufferError::Alloc { requested: len }
    })?;
    Ok(data)
}

impl<P: Platform> fmt::Debug for ApiConnection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConnection")
            .field("id", &self.id)
            .field("mode", &self.mode.name())
            .field("body", &self.body)
            .field("buf", &self.buf)
            .field("send_cursor", &self.send_cursor)
            .field("response_sent", &self.response_sent)
            .field("close_pending", &self.close_pending)
            .finish_non_exhaustive()
    }
}
