use crate::platform::{FileOf, FlashWriteSession, HandleOf, Platform, ScriptEngine, ScriptValue};

/// What a connection does with incoming body bytes and with send-ready events.
pub(crate) enum Mode<P: Platform> {
    /// Reading the head, or done with the body and waiting to respond.
    ProcessingRequest,
    /// Streaming the request body into a file.
    FileWrite(FileOf<P>),
    /// Streaming a file out, one send window at a time.
    FileRead(FileOf<P>),
    /// Streaming the request body into flash.
    FlashWrite(FlashWriteSession),
    /// Streaming a flash range out.
    FlashRead { offset: u32, remaining: u32 },
    /// A response buffer is in flight; `resume` takes over once it is fully sent.
    SendingResponse { resume: Box<Mode<P>> },
    /// A response producer returns the body chunk by chunk.
    SendingChunked(Producer<HandleOf<P>>),
    /// Buffering the whole body for the scripting environment.
    AwaitingScript(ScriptJob),
    /// Restart the device once the connection is closed.
    RestartPending,
    Closing,
    /// Nothing claimed the request.
    NotFound,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ScriptJob {
    /// Run the body as a script snippet.
    Exec,
    /// Offer the request to the registered callbacks.
    Callbacks,
}

/// A registered response producer and the argument it is called with.
pub(crate) struct Producer<H> {
    pub(crate) function: H,
    pub(crate) param: Option<ScriptValue<H>>,
}

impl<H> Producer<H> {
    pub(crate) fn release<S: ScriptEngine<Handle = H> + ?Sized>(self, script: &mut S) {
        script.release(self.function);
        if let Some(param) = self.param {
            script.release_value(param);
        }
    }
}

impl<P: Platform> Mode<P> {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::ProcessingRequest => "processing_request",
            Self::FileWrite(_) => "file_write",
            Self::FileRead(_) => "file_read",
            Self::FlashWrite(_) => "flash_write",
            Self::FlashRead { .. } => "flash_read",
            Self::SendingResponse { .. } => "sending_response",
            Self::SendingChunked(_) => "sending_chunked",
            Self::AwaitingScript(_) => "awaiting_script",
            Self::RestartPending => "restart_pending",
            Self::Closing => "closing",
            Self::NotFound => "not_found",
        }
    }

    /// Gives every script handle held by this mode, or the mode it resumes, back to
    /// the environment. Files and flash sessions are released by dropping them.
    pub(crate) fn release(self, script: &mut P::Script) {
        match self {
            Self::SendingChunked(producer) => producer.release(script),
            Self::SendingResponse { resume } => resume.release(script),
            _ => {}
        }
    }
}

/// How much of the request body is still expected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum BodyProgress {
    /// The head has not been fully received yet.
    AwaitingHead,
    Remaining(u64),
    Complete,
}

impl BodyProgress {
    pub(crate) fn remaining(len: u64) -> Self {
        if len == 0 { Self::Complete } else { Self::Remaining(len) }
    }
}
