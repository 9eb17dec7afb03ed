//! In-memory collaborators for exercising the server without a network stack.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Duration;

use crate::connection::ConnectionId;
use crate::platform::{
    DirEntry, FileSystem, Flash, FlashError, Listener, Network, OpenMode, Platform, ScriptEngine, ScriptError, ScriptResult,
    ScriptValue, Transport, TransportError,
};
use crate::server::{Server, ServerConfig};

pub(crate) type Value = ScriptValue<u32>;

#[derive(Debug, Default)]
pub(crate) struct TransportState {
    pub(crate) window: usize,
    pub(crate) sent: Vec<u8>,
    pub(crate) writes: Vec<usize>,
    pub(crate) recved: usize,
    pub(crate) busy_closes: usize,
    pub(crate) closed: bool,
    pub(crate) aborted: bool,
}

/// A transport whose state stays observable after the server took ownership.
#[derive(Debug, Clone)]
pub(crate) struct FakeTransport(Rc<RefCell<TransportState>>);

impl FakeTransport {
    pub(crate) fn new(window: usize) -> Self {
        Self(Rc::new(RefCell::new(TransportState { window, ..TransportState::default() })))
    }

    pub(crate) fn sent(&self) -> Vec<u8> {
        self.0.borrow().sent.clone()
    }

    pub(crate) fn sent_text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow().sent).into_owned()
    }

    pub(crate) fn writes(&self) -> Vec<usize> {
        self.0.borrow().writes.clone()
    }

    pub(crate) fn recved(&self) -> usize {
        self.0.borrow().recved
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.0.borrow().closed
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.0.borrow().aborted
    }

    /// The next `n` close attempts report a busy socket.
    pub(crate) fn refuse_closes(&self, n: usize) {
        self.0.borrow_mut().busy_closes = n;
    }

    pub(crate) fn set_window(&self, window: usize) {
        self.0.borrow_mut().window = window;
    }
}

impl Transport for FakeTransport {
    fn send_window(&self) -> usize {
        self.0.borrow().window
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.0.borrow_mut();
        assert!(data.len() <= state.window, "write of {} bytes exceeds window {}", data.len(), state.window);
        assert!(!state.closed && !state.aborted, "write after close");
        state.sent.extend_from_slice(data);
        state.writes.push(data.len());
        Ok(())
    }

    fn recved(&mut self, len: usize) {
        self.0.borrow_mut().recved += len;
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.0.borrow_mut();
        if state.busy_closes > 0 {
            state.busy_closes -= 1;
            return Err(TransportError::Busy);
        }
        state.closed = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.0.borrow_mut().aborted = true;
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeListener {
    pub(crate) closed: Rc<RefCell<bool>>,
}

impl Listener for FakeListener {
    fn close(&mut self) -> Result<(), TransportError> {
        *self.closed.borrow_mut() = true;
        Ok(())
    }

    fn abort(&mut self) {
        *self.closed.borrow_mut() = true;
    }
}

/// Hands out listeners; accepted transports of type `T` are injected by the tests.
#[derive(Debug)]
pub(crate) struct FakeNetwork<T = FakeTransport> {
    pub(crate) ports: Vec<u16>,
    pub(crate) listener_closed: Rc<RefCell<bool>>,
    transport: PhantomData<T>,
}

impl<T> Default for FakeNetwork<T> {
    fn default() -> Self {
        Self { ports: Vec::new(), listener_closed: Rc::default(), transport: PhantomData }
    }
}

impl<T: Transport> Network for FakeNetwork<T> {
    type Listener = FakeListener;
    type Transport = T;

    fn listen(&mut self, port: u16) -> Result<FakeListener, TransportError> {
        self.ports.push(port);
        Ok(FakeListener { closed: Rc::clone(&self.listener_closed) })
    }
}

type Files = Rc<RefCell<Vec<(String, Vec<u8>)>>>;

/// A flat filesystem listing files in creation order.
#[derive(Debug, Default)]
pub(crate) struct MemFs {
    files: Files,
    pub(crate) read_only: bool,
}

impl MemFs {
    pub(crate) fn insert(&mut self, path: &str, data: &[u8]) {
        let mut files = self.files.borrow_mut();
        match files.iter_mut().find(|(name, _)| name == path) {
            Some((_, content)) => *content = data.to_vec(),
            None => files.push((path.to_owned(), data.to_vec())),
        }
    }

    pub(crate) fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().iter().find(|(name, _)| name == path).map(|(_, data)| data.clone())
    }
}

#[derive(Debug)]
pub(crate) struct MemFile {
    files: Files,
    path: String,
    position: usize,
}

impl io::Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let files = self.files.borrow();
        let Some((_, data)) = files.iter().find(|(name, _)| *name == self.path) else {
            return Ok(0);
        };
        let rest = data.get(self.position..).unwrap_or_default();
        let len = rest.len().min(buf.len());
        buf[..len].copy_from_slice(&rest[..len]);
        self.position += len;
        Ok(len)
    }
}

impl io::Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut files = self.files.borrow_mut();
        let (_, data) = files
            .iter_mut()
            .find(|(name, _)| *name == self.path)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FileSystem for MemFs {
    type File = MemFile;

    fn open(&mut self, path: &str, mode: OpenMode) -> io::Result<MemFile> {
        let exists = self.get(path).is_some();
        match mode {
            OpenMode::Read if !exists => return Err(io::ErrorKind::NotFound.into()),
            OpenMode::Read => {}
            _ if self.read_only => return Err(io::ErrorKind::PermissionDenied.into()),
            OpenMode::Write => self.insert(path, b""),
            OpenMode::Append if !exists => self.insert(path, b""),
            OpenMode::Append => {}
        }
        Ok(MemFile { files: Rc::clone(&self.files), path: path.to_owned(), position: 0 })
    }

    fn size(&mut self, file: &MemFile) -> io::Result<u64> {
        self.get(&file.path).map(|data| data.len() as u64).ok_or_else(|| io::ErrorKind::NotFound.into())
    }

    fn remove(&mut self, path: &str) -> io::Result<()> {
        let mut files = self.files.borrow_mut();
        let index = files.iter().position(|(name, _)| name == path).ok_or(io::ErrorKind::NotFound)?;
        files.remove(index);
        Ok(())
    }

    fn list_dir(&mut self, _path: &str) -> io::Result<Vec<DirEntry>> {
        Ok(self.files.borrow().iter().map(|(name, data)| DirEntry::new(name.clone(), data.len() as u64)).collect())
    }
}

/// Flash that enforces word-aligned writes to erased memory.
#[derive(Debug)]
pub(crate) struct MemFlash {
    data: Vec<u8>,
    erased: Vec<u32>,
    writes: Vec<(u32, usize)>,
}

impl MemFlash {
    pub(crate) fn new(size: usize) -> Self {
        Self { data: vec![0; size], erased: Vec::new(), writes: Vec::new() }
    }

    pub(crate) fn with_content(content: &[u8]) -> Self {
        Self { data: content.to_vec(), erased: Vec::new(), writes: Vec::new() }
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn erased(&self) -> &[u32] {
        &self.erased
    }

    pub(crate) fn writes(&self) -> &[(u32, usize)] {
        &self.writes
    }
}

impl Flash for MemFlash {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let start = offset as usize;
        let data = self.data.get(start..start + buf.len()).ok_or(FlashError::OutOfRange { offset })?;
        buf.copy_from_slice(data);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), FlashError> {
        if offset % 4 != 0 || data.len() % 4 != 0 {
            return Err(FlashError::Unaligned { offset });
        }
        let sector = offset / Self::SECTOR_SIZE;
        if !self.erased.contains(&sector) {
            return Err(FlashError::Write { offset });
        }
        let start = offset as usize;
        let target = self.data.get_mut(start..start + data.len()).ok_or(FlashError::OutOfRange { offset })?;
        target.copy_from_slice(data);
        self.writes.push((offset, data.len()));
        Ok(())
    }

    fn erase_sector(&mut self, sector: u32) -> Result<(), FlashError> {
        let start = (sector * Self::SECTOR_SIZE) as usize;
        let end = start + Self::SECTOR_SIZE as usize;
        let region = self.data.get_mut(start..end).ok_or(FlashError::Erase { sector })?;
        region.fill(0xFF);
        self.erased.push(sector);
        Ok(())
    }
}

type Function = Box<dyn FnMut(&[Value]) -> ScriptResult<u32>>;
type Snippet = Box<dyn FnMut(&[u8]) -> ScriptResult<u32>>;

/// A scripting environment whose functions are Rust closures.
#[derive(Default)]
pub(crate) struct FakeScripts {
    next_handle: u32,
    functions: HashMap<u32, Function>,
    exec: Option<Snippet>,
    pub(crate) calls: Vec<(u32, Vec<Value>)>,
    pub(crate) released: Vec<u32>,
    pub(crate) recovered: usize,
}

impl FakeScripts {
    pub(crate) fn register(&mut self, function: impl FnMut(&[Value]) -> ScriptResult<u32> + 'static) -> u32 {
        self.next_handle += 1;
        self.functions.insert(self.next_handle, Box::new(function));
        self.next_handle
    }

    pub(crate) fn on_exec(&mut self, exec: impl FnMut(&[u8]) -> ScriptResult<u32> + 'static) {
        self.exec = Some(Box::new(exec));
    }

    pub(crate) fn calls_to(&self, handle: u32) -> usize {
        self.calls.iter().filter(|(called, _)| *called == handle).count()
    }

    /// Handles registered and not yet released.
    pub(crate) fn live(&self) -> usize {
        self.functions.len()
    }
}

impl std::fmt::Debug for FakeScripts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeScripts").field("live", &self.functions.len()).field("released", &self.released).finish_non_exhaustive()
    }
}

impl ScriptEngine for FakeScripts {
    type Handle = u32;

    fn exec(&mut self, source: &[u8]) -> ScriptResult<u32> {
        match self.exec.as_mut() {
            Some(exec) => exec(source),
            None => Err(ScriptError::new("exec: no interpreter")),
        }
    }

    fn call(&mut self, function: &u32, args: &[Value]) -> ScriptResult<u32> {
        self.calls.push((*function, args.to_vec()));
        let callable = self.functions.get_mut(function).ok_or_else(|| ScriptError::new("attempt to call a released function"))?;
        callable(args)
    }

    fn release(&mut self, handle: u32) {
        assert!(self.functions.remove(&handle).is_some(), "handle {handle} released twice");
        self.released.push(handle);
    }

    fn recover(&mut self) {
        self.recovered += 1;
    }
}

#[derive(Debug)]
pub(crate) struct TestPlatform<T = FakeTransport> {
    pub(crate) network: FakeNetwork<T>,
    pub(crate) fs: MemFs,
    pub(crate) flash: MemFlash,
    pub(crate) script: FakeScripts,
    pub(crate) restarts: Vec<Duration>,
}

impl<T> TestPlatform<T> {
    pub(crate) fn new() -> Self {
        Self {
            network: FakeNetwork::default(),
            fs: MemFs::default(),
            flash: MemFlash::new(4 * 4096),
            script: FakeScripts::default(),
            restarts: Vec::new(),
        }
    }
}

impl<T: Transport> Platform for TestPlatform<T> {
    type Network = FakeNetwork<T>;
    type Fs = MemFs;
    type Flash = MemFlash;
    type Script = FakeScripts;

    fn network(&mut self) -> &mut FakeNetwork<T> {
        &mut self.network
    }

    fn fs(&mut self) -> &mut MemFs {
        &mut self.fs
    }

    fn flash(&mut self) -> &mut MemFlash {
        &mut self.flash
    }

    fn script(&mut self) -> &mut FakeScripts {
        &mut self.script
    }

    fn schedule_restart(&mut self, delay: Duration) {
        self.restarts.push(delay);
    }
}

pub(crate) fn server(config: ServerConfig, platform: TestPlatform) -> Server<TestPlatform> {
    Server::create(config, platform).unwrap()
}

pub(crate) fn connect(server: &mut Server<TestPlatform>, window: usize) -> (ConnectionId, FakeTransport) {
    let transport = FakeTransport::new(window);
    let id = server.accept(transport.clone()).unwrap();
    (id, transport)
}

/// Delivers send-ready notifications until the connection closes.
pub(crate) fn drain(server: &mut Server<TestPlatform>, id: ConnectionId) {
    for _ in 0..100_000 {
        if !server.is_connected(id) {
            return;
        }
        server.on_sent(id, 0);
    }
    panic!("connection {id} never closed");
}

/// Sends `request` in one segment and drains the response.
pub(crate) fn exchange(server: &mut Server<TestPlatform>, request: &[u8], window: usize) -> FakeTransport {
    let (id, transport) = connect(server, window);
    server.on_receive(id, [request]);
    drain(server, id);
    transport
}

/// A complete response as the client saw it.
#[derive(Debug)]
pub(crate) struct Reply {
    head: String,
    pub(crate) body: Vec<u8>,
}

impl Reply {
    /// Splits `raw` at the blank line and checks any `Content-Length` against the body.
    pub(crate) fn parse(raw: &[u8]) -> Self {
        let end = crate::strings::find(raw, b"\r\n\r\n").expect("response head is complete") + 4;
        let reply = Self { head: String::from_utf8(raw[..end].to_vec()).unwrap(), body: raw[end..].to_vec() };
        if let Some(length) = reply.header("Content-Length") {
            assert_eq!(length.parse::<usize>().unwrap(), reply.body.len(), "Content-Length of {:?}", reply.status_line());
        }
        reply
    }

    pub(crate) fn status_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub(crate) fn status(&self) -> u16 {
        self.status_line().split(' ').nth(1).and_then(|code| code.parse().ok()).unwrap()
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.head
            .split("\r\n")
            .filter_map(|line| line.split_once(':'))
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
    }

    pub(crate) fn text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }
}

/// A request with a `Content-Length` matching `body` and any extra header lines.
pub(crate) fn request(method: &str, target: &str, headers: &[&str], body: &[u8]) -> Vec<u8> {
    let mut request = format!("{method} {target} HTTP/1.1\r\nHost: 192.168.4.1\r\n");
    for header in headers {
        request.push_str(header);
        request.push_str("\r\n");
    }
    if !body.is_empty() {
        request.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    request.push_str("\r\n");

    let mut request = request.into_bytes();
    request.extend_from_slice(body);
    request
}

pub(crate) fn crlf(text: &str) -> String {
    text.replace('\n', "\r\n")
}
