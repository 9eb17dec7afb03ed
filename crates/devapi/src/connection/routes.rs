//! Route actions: what each API route does once the request head is parsed, and
//! what the buffering routes do once the body is complete.

use std::io::{self, Write};

use bytes::Bytes;
use http::Method;
use tracing::{debug, error, info, warn};

use crate::buffer::BufferError;
use crate::codec::{BodyLength, encode_response, patch_content_length};
use crate::connection::mode::{Mode, Producer, ScriptJob};
use crate::connection::{ApiConnection, Context};
use crate::platform::{FileOf, FileSystem, FlashWriteSession, OpenMode, Platform, ScriptEngine, ScriptError, ScriptValue, ValueOf};
use crate::protocol::content_type::{self, APPLICATION_JSON, APPLICATION_OCTET_STREAM, TEXT_HTML, TEXT_PLAIN};
use crate::protocol::{ConnectionError, RequestHead, ResponseStatus};
use crate::router::Route;

pub(crate) const VERSION: &str = "1";

const INDEX_FILE: &str = "index.html";
const DEFAULT_PAGE: &str =
    r#"<!DOCTYPE html><div id="root"/><script src="https://s-pw.github.io/nodemcu-restide/bundle.js"></script>"#;

impl<P: Platform> ApiConnection<P> {
    pub(super) fn route(&mut self, ctx: &mut Context<'_, P>, head: RequestHead) -> Result<(), ConnectionError> {
        let route = ctx.router.at(head.path());
        info!(id = %self.id, method = %head.method(), target = head.target(), ?route, "request");

        if route.requires_auth() && !self.authorize(ctx, &head)? {
            self.request = Some(head);
            return Ok(());
        }

        match route {
            Route::FsList => self.list_dir(ctx)?,
            Route::FsFile(path) => self.file_action(ctx, head.method(), path)?,
            Route::Restart => self.mode = Mode::RestartPending,
            Route::Log => self.send_log(ctx)?,
            Route::Exec => self.mode = Mode::AwaitingScript(ScriptJob::Exec),
            Route::Flash(range) => self.flash_action(ctx, head.method(), range)?,
            Route::Ping => {}
            Route::Version => {
                self.respond(ResponseStatus::Ok, Some(TEXT_PLAIN), BodyLength::Fixed(VERSION.len() as u64), Some(VERSION.as_bytes()))?;
            }
            Route::Root => self.serve_root(ctx)?,
            Route::Fallback => self.mode = Mode::AwaitingScript(ScriptJob::Callbacks),
        }

        self.request = Some(head);
        Ok(())
    }

    /// Compares the request credentials with the configured ones, answering 401 on
    /// a mismatch.
    fn authorize(&mut self, ctx: &Context<'_, P>, head: &RequestHead) -> Result<bool, ConnectionError> {
        let Some(expected) = ctx.shared.credentials.as_deref() else {
            return Ok(true);
        };
        if head.credentials() == Some(expected) {
            return Ok(true);
        }

        warn!(id = %self.id, target = head.target(), has_credentials = head.credentials().is_some(), "unauthorized");
        self.respond(ResponseStatus::Unauthorized, None, BodyLength::None, None)?;
        Ok(false)
    }

    /// `{"name":size,...}` of the filesystem root, in listing order.
    fn list_dir(&mut self, ctx: &mut Context<'_, P>) -> Result<(), ConnectionError> {
        let entries = ctx.platform.fs().list_dir("")?;

        let head_len = encode_response(&mut self.buf, ResponseStatus::Ok, Some(APPLICATION_JSON), BodyLength::Deferred, None)?;
        self.buf.append(b"{")?;
        for entry in &entries {
            let name = serde_json::Value::from(entry.name.as_str());
            self.buf.append(format!("{name}:{},", entry.size).as_bytes())?;
        }
        if entries.is_empty() {
            self.buf.append(b"}")?;
        } else {
            let last = self.buf.len() - 1;
            self.buf.replace(last, 1, b"}")?;
        }

        let body_len = (self.buf.len() - head_len) as u64;
        patch_content_length(&mut self.buf, body_len)?;
        debug!(id = %self.id, entries = entries.len(), "listing directory");
        self.start_send()
    }

    fn file_action(&mut self, ctx: &mut Context<'_, P>, method: &Method, path: &str) -> Result<(), ConnectionError> {
        let fs = ctx.platform.fs();
        match *method {
            Method::POST | Method::PUT => {
                let mode = if *method == Method::POST { OpenMode::Write } else { OpenMode::Append };
                let mut file = match fs.open(path, mode) {
                    Ok(file) => file,
                    Err(e) => {
                        error!(id = %self.id, path, cause = %e, "can't open file for writing");
                        return self.respond(ResponseStatus::InternalError, None, BodyLength::None, None);
                    }
                };
                if !self.buf.is_empty() {
                    file.write_all(self.buf.as_slice())?;
                    self.buf.free();
                }
                debug!(id = %self.id, path, ?mode, "receiving file");
                self.mode = Mode::FileWrite(file);
                Ok(())
            }
            Method::GET => match fs.open(path, OpenMode::Read) {
                Ok(file) => {
                    let size = fs.size(&file)?;
                    self.stream_file(file, APPLICATION_OCTET_STREAM, size)
                }
                Err(e) => self.respond_io_error(path, &e),
            },
            Method::DELETE => match fs.remove(path) {
                Ok(()) => {
                    info!(id = %self.id, path, "removed file");
                    Ok(())
                }
                Err(e) => self.respond_io_error(path, &e),
            },
            _ => {
                debug!(id = %self.id, %method, path, "no file action for method");
                Ok(())
            }
        }
    }

    fn respond_io_error(&mut self, path: &str, e: &io::Error) -> Result<(), ConnectionError> {
        let status = if e.kind() == io::ErrorKind::NotFound {
            ResponseStatus::NotFound
        } else {
            ResponseStatus::InternalError
        };
        warn!(id = %self.id, path, cause = %e, ?status, "file action failed");
        self.respond(status, None, BodyLength::None, None)
    }

    /// Sends the head of a file response; the content follows as the transport
    /// drains.
    fn stream_file(&mut self, file: FileOf<P>, content_type: &str, size: u64) -> Result<(), ConnectionError> {
        encode_response(&mut self.buf, ResponseStatus::Ok, Some(content_type), BodyLength::Fixed(size), None)?;
        self.mode = Mode::FileRead(file);
        self.start_send()
    }

    fn send_log(&mut self, ctx: &mut Context<'_, P>) -> Result<(), ConnectionError> {
        let Some(log) = ctx.shared.log.take() else {
            debug!(id = %self.id, "log is empty");
            return Ok(());
        };
        self.respond(ResponseStatus::Ok, Some(TEXT_PLAIN), BodyLength::Fixed(log.len() as u64), Some(&log))
    }

    fn flash_action(&mut self, ctx: &mut Context<'_, P>, method: &Method, range: &str) -> Result<(), ConnectionError> {
        match *method {
            Method::POST => {
                let Some(offset) = parse_hex(range) else {
                    warn!(id = %self.id, range, "malformed flash offset");
                    return self.respond(ResponseStatus::NotFound, None, BodyLength::None, None);
                };
                let mut session = match FlashWriteSession::begin(offset) {
                    Ok(session) => session,
                    Err(e) => {
                        warn!(id = %self.id, cause = %e, "can't start flash write");
                        return self.respond(ResponseStatus::InternalError, None, BodyLength::None, None);
                    }
                };
                if !self.buf.is_empty() {
                    session.write(ctx.platform.flash(), self.buf.as_slice())?;
                    self.buf.free();
                }
                info!(id = %self.id, offset = format_args!("{offset:#x}"), "receiving flash image");
                self.mode = Mode::FlashWrite(session);
                Ok(())
            }
            Method::GET => {
                let Some((offset, len)) = range
                    .split_once(',')
                    .and_then(|(offset, len)| Some((parse_hex(offset)?, parse_hex(len)?)))
                    .filter(|&(offset, len)| offset.checked_add(len).is_some())
                else {
                    warn!(id = %self.id, range, "malformed flash range");
                    return self.respond(ResponseStatus::NotFound, None, BodyLength::None, None);
                };
                encode_response(&mut self.buf, ResponseStatus::Ok, Some(APPLICATION_OCTET_STREAM), BodyLength::Fixed(u64::from(len)), None)?;
                self.mode = Mode::FlashRead { offset, remaining: len };
                self.start_send()
            }
            _ => {
                debug!(id = %self.id, %method, "no flash action for method");
                Ok(())
            }
        }
    }

    fn serve_root(&mut self, ctx: &mut Context<'_, P>) -> Result<(), ConnectionError> {
        let fs = ctx.platform.fs();
        match fs.open(INDEX_FILE, OpenMode::Read) {
            Ok(file) => {
                let size = fs.size(&file)?;
                self.stream_file(file, TEXT_HTML, size)
            }
            Err(_) => self.respond(
                ResponseStatus::Ok,
                Some(TEXT_HTML),
                BodyLength::Fixed(DEFAULT_PAGE.len() as u64),
                Some(DEFAULT_PAGE.as_bytes()),
            ),
        }
    }

    pub(super) fn run_script(&mut self, ctx: &mut Context<'_, P>, job: ScriptJob) -> Result<(), ConnectionError> {
        match job {
            ScriptJob::Exec => self.exec(ctx),
            ScriptJob::Callbacks => self.dispatch(ctx),
        }
    }

    /// Runs the buffered body as a script snippet and answers with its results.
    fn exec(&mut self, ctx: &mut Context<'_, P>) -> Result<(), ConnectionError> {
        let source = self.buf.take();
        let script = ctx.platform.script();

        let values = match script.exec(source.as_deref().unwrap_or_default()) {
            Ok(values) => values,
            Err(e) => {
                warn!(id = %self.id, cause = %e, "exec failed");
                script.recover();
                return self.respond_script_error(&e);
            }
        };

        let encoded = encode_response(&mut self.buf, ResponseStatus::Ok, Some(TEXT_PLAIN), BodyLength::Deferred, None)
            .and_then(|head_len| self.append_results(&values).map(|()| head_len));
        for value in values {
            script.release_value(value);
        }
        let head_len = encoded?;

        let body_len = (self.buf.len() - head_len) as u64;
        patch_content_length(&mut self.buf, body_len)?;
        self.start_send()
    }

    fn respond_script_error(&mut self, e: &ScriptError) -> Result<(), ConnectionError> {
        let message = e.message().as_bytes();
        self.respond(ResponseStatus::InternalError, Some(TEXT_PLAIN), BodyLength::Fixed(message.len() as u64), Some(message))
    }

    /// Non-nil results, one per line.
    fn append_results(&mut self, values: &[ValueOf<P>]) -> Result<(), BufferError> {
        for (index, value) in values.iter().filter(|value| !value.is_nil()).enumerate() {
            if index > 0 {
                self.buf.append(b"\n")?;
            }
            self.buf.append(&value.display())?;
        }
        Ok(())
    }

    /// Offers the request to the callbacks in registration order; the first one
    /// returning any value answers it. Unclaimed requests fall back to static files.
    fn dispatch(&mut self, ctx: &mut Context<'_, P>) -> Result<(), ConnectionError> {
        let Some(head) = self.request.as_ref() else {
            return Ok(());
        };
        let static_path = head.path().strip_prefix('/').unwrap_or(head.path()).to_owned();
        let body = self.buf.take().map(Bytes::from).unwrap_or_default();

        let mut args: Vec<ValueOf<P>> = vec![
            ScriptValue::from(head.method().as_str().to_owned()),
            ScriptValue::from(head.target().to_owned()),
            ScriptValue::Str(body),
        ];
        if let Some(credentials) = head.credentials() {
            args.push(ScriptValue::from(credentials.to_owned()));
        }

        let script = ctx.platform.script();
        for (index, callback) in ctx.shared.callbacks.iter().enumerate() {
            match script.call(callback, &args) {
                Ok(values) if values.is_empty() => {}
                Ok(values) => {
                    debug!(id = %self.id, index, "callback claimed request");
                    return self.respond_with(script, values);
                }
                Err(e) => {
                    error!(id = %self.id, index, cause = %e, "callback failed");
                    script.recover();
                    return self.respond_script_error(&e);
                }
            }
        }

        self.serve_static(ctx, &static_path)
    }

    /// Answers with `status[, content_type[, body | producer[, param]]]`.
    fn respond_with(&mut self, script: &mut P::Script, values: Vec<ValueOf<P>>) -> Result<(), ConnectionError> {
        let mut values = values.into_iter();

        let status = match values.next() {
            Some(value) => {
                let code = value.to_integer();
                script.release_value(value);
                code.map_or(ResponseStatus::InternalError, ResponseStatus::from_code)
            }
            None => ResponseStatus::InternalError,
        };
        let (has_content_type, content_type) = match values.next() {
            Some(value) => {
                let content_type = value.to_bytes().map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
                script.release_value(value);
                (true, content_type)
            }
            None => (false, None),
        };
        let content_type = content_type.as_deref();

        let encoded = match values.next() {
            Some(ScriptValue::Function(function)) => {
                let param = values.next();
                debug!(id = %self.id, has_param = param.is_some(), "chunked response");
                self.mode = Mode::SendingChunked(Producer { function, param });
                encode_response(&mut self.buf, status, content_type, BodyLength::Chunked, None)
            }
            Some(value) => {
                let body = value.to_bytes().unwrap_or_default();
                script.release_value(value);
                encode_response(&mut self.buf, status, content_type, BodyLength::Fixed(body.len() as u64), Some(&body))
            }
            None if has_content_type => encode_response(&mut self.buf, status, content_type, BodyLength::Fixed(0), None),
            None => encode_response(&mut self.buf, status, None, BodyLength::None, None),
        };
        for value in values {
            script.release_value(value);
        }

        encoded?;
        self.start_send()
    }

    fn serve_static(&mut self, ctx: &mut Context<'_, P>, path: &str) -> Result<(), ConnectionError> {
        let fs = ctx.platform.fs();
        match fs.open(path, OpenMode::Read) {
            Ok(file) => {
                let size = fs.size(&file)?;
                debug!(id = %self.id, path, size, "serving static file");
                self.stream_file(file, content_type::for_path(path), size)
            }
            Err(e) => {
                debug!(id = %self.id, path, cause = %e, "nothing to serve");
                self.mode = Mode::NotFound;
                Ok(())
            }
        }
    }
}

/// Parses a hex number the way the flash routes write them, optionally `0x` prefixed.
fn parse_hex(s: &str) -> Option<u32> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}
