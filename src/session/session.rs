//! Session runtime: handshake, read loop, write loop, teardown.
//!
//! A [`Session`] owns one byte-stream connection and runs two tasks over it:
//! a read loop that decodes incoming units and dispatches them to handlers,
//! and a write loop that drains the outbound [`PageBuffer`] into the
//! connection. The first exchange is always textual: the peer (or this side,
//! with [`Session::initiate`]) sends `+hello <contentType>`, and the
//! negotiated content type governs everything after it.
//!
//! # Example
//!
//! ```ignore
//! use sesswire::session::{ContentType, Session};
//!
//! let session = Session::new()
//!     .initiate(ContentType::Text)
//!     .events(MyEvents::default())
//!     .commands(MyCommands::default());
//!
//! session.serve(stream).await?;
//! ```

use std::collections::HashSet;
use std::io;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::config::{ContentType, SessionConfig};
use super::handler::{BodyReader, CommandHandler, SessionEventHandler};
use crate::buffer::PageBuffer;
use crate::codec::{self, Message, MAX_BODY_SIZE, MAX_TYPE_ID, MAX_VARINT_LEN};
use crate::error::{is_benign_disconnect, Result, SesswireError};
use crate::textual::{btoi64, Command, Kind, Value};

/// State shared between the handle, the read loop, and the write loop.
struct Shared {
    /// Outbound byte queue; `SessionHandle::write` stages into it.
    outbound: Mutex<PageBuffer>,
    /// Wakes the write loop on the empty-to-non-empty transition.
    wake_writer: Notify,
    /// Wakes the read loop's select when the session is closing.
    shutdown: Notify,
    /// One-shot close flag.
    closed: AtomicBool,
    /// Negotiated content type as its wire value; 0 while pending.
    content_type: AtomicU8,
    /// First fatal error observed; later errors are dropped.
    fatal: Mutex<Option<SesswireError>>,
}

impl Shared {
    fn new(config: &SessionConfig) -> Self {
        Self {
            outbound: Mutex::new(PageBuffer::new(config.page_size, config.max_idle_pages)),
            wake_writer: Notify::new(),
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
            content_type: AtomicU8::new(0),
            fatal: Mutex::new(None),
        }
    }

    /// Flip the close flag exactly once and wake both loops.
    fn begin_close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.wake_writer.notify_one();
            self.shutdown.notify_waiters();
        }
    }

    /// Record the terminal error; only the first one wins.
    fn set_fatal(&self, err: SesswireError) {
        let mut slot = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn set_content_type(&self, ct: ContentType) {
        self.content_type
            .store(ct.wire_value() as u8, Ordering::Release);
    }

    fn content_type(&self) -> Option<ContentType> {
        ContentType::from_wire(i64::from(self.content_type.load(Ordering::Acquire)))
    }
}

/// Clonable handle for writing to and closing a running session.
///
/// `write` may be called from any task, including handler callbacks; it only
/// stages bytes and never blocks on the connection.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Stage `data` on the outbound queue.
    ///
    /// The bytes of one call are enqueued contiguously, so concurrent
    /// writers never interleave within a unit. Fails with
    /// [`SesswireError::ConnectionClosed`] after [`close`](Self::close).
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(SesswireError::ConnectionClosed);
        }
        let was_empty;
        {
            let mut outbound = self.shared.outbound.lock().unwrap_or_else(|e| e.into_inner());
            was_empty = outbound.is_empty();
            io::Write::write_all(&mut *outbound, data)?;
        }
        if was_empty {
            self.shared.wake_writer.notify_one();
        }
        Ok(data.len())
    }

    /// Stage a textual value's wire bytes.
    pub fn write_value(&self, value: &Value) -> Result<usize> {
        self.write(value.wire())
    }

    /// Encode a binary message and stage it.
    pub fn write_message(&self, msg: &dyn Message) -> Result<usize> {
        let frame = codec::encode(msg)?;
        self.write(&frame)
    }

    /// Begin closing the session. Idempotent.
    pub fn close(&self) {
        self.shared.begin_close();
    }

    /// Whether the session is closed or closing.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Content type negotiated by the handshake, if it completed.
    pub fn content_type(&self) -> Option<ContentType> {
        self.shared.content_type()
    }

    /// Whether the handshake has completed.
    pub fn is_handshaked(&self) -> bool {
        self.shared.content_type().is_some()
    }
}

/// Event handler used when the caller registers none.
struct NoopEvents;

#[async_trait::async_trait]
impl SessionEventHandler for NoopEvents {}

/// One session over one connection, builder-style.
pub struct Session {
    config: SessionConfig,
    events: Option<Arc<dyn SessionEventHandler>>,
    commands: Option<Arc<dyn CommandHandler>>,
}

impl Session {
    /// Create a session with default configuration.
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            events: None,
            commands: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the outbound queue's page size (power of two).
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    /// Set how many idle pages the outbound queue retains.
    pub fn max_idle_pages(mut self, pages: usize) -> Self {
        self.config.max_idle_pages = pages;
        self
    }

    /// Bound each record read by `timeout`.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    /// Cap accepted binary message bodies.
    pub fn max_body_size(mut self, max: u64) -> Self {
        self.config.max_body_size = max;
        self
    }

    /// Open the handshake from this side with the given content type.
    pub fn initiate(mut self, content_type: ContentType) -> Self {
        self.config.initiate = Some(content_type);
        self
    }

    /// Register the lifecycle/message handler.
    pub fn events<H: SessionEventHandler>(mut self, handler: H) -> Self {
        self.events = Some(Arc::new(handler));
        self
    }

    /// Register an already-shared lifecycle/message handler.
    pub fn events_arc(mut self, handler: Arc<dyn SessionEventHandler>) -> Self {
        self.events = Some(handler);
        self
    }

    /// Register the command handler (textual content type only).
    pub fn commands<H: CommandHandler>(mut self, handler: H) -> Self {
        self.commands = Some(Arc::new(handler));
        self
    }

    /// Register an already-shared command handler.
    pub fn commands_arc(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.commands = Some(handler);
        self
    }

    /// Run the session until it closes.
    ///
    /// Starts the write loop, runs the read loop, performs the handshake,
    /// and blocks until teardown. The connection is closed exactly once;
    /// `on_close` fires exactly once with the terminal error, which is also
    /// returned (`Ok` on clean shutdown).
    pub async fn serve<C>(self, conn: C) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Send + 'static,
    {
        let Session {
            config,
            events,
            commands,
        } = self;
        let events: Arc<dyn SessionEventHandler> =
            events.unwrap_or_else(|| Arc::new(NoopEvents));
        let shared = Arc::new(Shared::new(&config));
        let handle = SessionHandle {
            shared: shared.clone(),
        };

        let (read_half, write_half) = tokio::io::split(conn);
        let mut reader = BufReader::new(read_half);
        let writer = BufWriter::new(write_half);

        events.on_open(&handle).await;

        let writer_task = tokio::spawn(write_loop(writer, shared.clone(), config.page_size));

        let loop_result = async {
            let mut hello_sent = false;
            if let Some(ct) = config.initiate {
                let mut hello = Value::new();
                hello.set_string(&format!("hello {}", ct.wire_value()));
                handle.write(hello.wire())?;
                hello_sent = true;
            }
            read_loop(
                &mut reader,
                &handle,
                events.as_ref(),
                commands.as_deref(),
                &config,
                hello_sent,
            )
            .await
        }
        .await;

        if let Err(err) = loop_result {
            // One final textual diagnostic line for protocol-class failures,
            // staged before the close so the write loop still drains it.
            let textual_phase = handle.content_type() != Some(ContentType::Binary);
            if textual_phase
                && matches!(
                    err,
                    SesswireError::Protocol(_)
                        | SesswireError::Overflow { .. }
                        | SesswireError::VarintOverflow
                        | SesswireError::IntegerRange { .. }
                )
            {
                let mut diag = Value::new();
                diag.set_error(&err.to_string());
                let _ = handle.write(diag.wire());
            }
            if is_benign_disconnect(&err) {
                debug!(error = %err, "session closed by peer");
            } else {
                warn!(error = %err, "session failed");
            }
            shared.set_fatal(err);
        }
        shared.begin_close();

        if writer_task.await.is_err() {
            shared.set_fatal(SesswireError::Protocol("write loop panicked".to_string()));
        }

        let fatal = shared
            .fatal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        events.on_close(fatal.as_ref()).await;
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of handling one inbound unit.
enum Step {
    /// Keep reading.
    Continue,
    /// The peer ended the stream cleanly at a record boundary.
    Close,
}

async fn read_loop<R>(
    reader: &mut BufReader<R>,
    handle: &SessionHandle,
    events: &dyn SessionEventHandler,
    commands: Option<&dyn CommandHandler>,
    config: &SessionConfig,
    hello_sent: bool,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut value = Value::new();
    let mut reply = Value::new();
    let known: HashSet<String> = commands
        .map(|h| h.commands().iter().map(|c| c.to_ascii_lowercase()).collect())
        .unwrap_or_default();

    loop {
        let mut shutdown = pin!(handle.shared.shutdown.notified());
        shutdown.as_mut().enable();
        if handle.is_closed() {
            return Ok(());
        }

        let step = tokio::select! {
            _ = &mut shutdown => return Ok(()),
            unit = read_one_unit(
                reader, handle, events, commands, config, &known, &mut value, &mut reply,
                hello_sent,
            ) => unit?,
        };
        match step {
            Step::Continue => {}
            Step::Close => return Ok(()),
        }
    }
}

/// Apply the optional per-record read timeout.
async fn maybe_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "record read timed out").into())
            }
        },
        None => fut.await,
    }
}

/// Read and dispatch one inbound unit: a handshake line, a textual command,
/// or a binary record, depending on session state.
#[allow(clippy::too_many_arguments)]
async fn read_one_unit<R>(
    reader: &mut BufReader<R>,
    handle: &SessionHandle,
    events: &dyn SessionEventHandler,
    commands: Option<&dyn CommandHandler>,
    config: &SessionConfig,
    known: &HashSet<String>,
    value: &mut Value,
    reply: &mut Value,
    hello_sent: bool,
) -> Result<Step>
where
    R: AsyncRead + Unpin + Send,
{
    if handle.content_type() == Some(ContentType::Binary) {
        return read_binary_unit(reader, handle, events, config).await;
    }

    // The timeout bounds the wire read; handler dispatch below is untimed,
    // since a slow handler stalling its own session is part of the contract.
    match maybe_timeout(config.read_timeout, value.read_from(reader)).await {
        Ok(()) => {}
        Err(SesswireError::ConnectionClosed) => return Ok(Step::Close),
        Err(err) => return Err(err),
    }

    if !handle.is_handshaked() {
        return handshake_unit(handle, events, value, reply, hello_sent).await;
    }

    let Some(cmd) = Command::parse(value) else {
        reply.set_error("invalid command");
        handle.write(reply.wire())?;
        return Ok(Step::Continue);
    };
    if cmd.name_eq("hello") {
        reply.set_error("don't hello again");
        handle.write(reply.wire())?;
        return Ok(Step::Continue);
    }
    let recognized = std::str::from_utf8(cmd.name())
        .ok()
        .map(|name| known.contains(&name.to_ascii_lowercase()))
        .unwrap_or(false);
    if !recognized {
        reply.set_error(&format!(
            "unknown command '{}'",
            String::from_utf8_lossy(cmd.name())
        ));
        handle.write(reply.wire())?;
        return Ok(Step::Continue);
    }
    if let Some(handler) = commands {
        handler.on_command(handle, &cmd).await?;
    }
    Ok(Step::Continue)
}

/// Process one unit while the handshake is pending.
async fn handshake_unit(
    handle: &SessionHandle,
    events: &dyn SessionEventHandler,
    value: &Value,
    reply: &mut Value,
    hello_sent: bool,
) -> Result<Step> {
    let cmd = match Command::parse(value) {
        Some(cmd) => cmd,
        None => {
            // An error value here is the peer refusing our hello.
            if hello_sent && value.root().kind() == Kind::Error {
                return Err(SesswireError::HandshakeRejected(
                    String::from_utf8_lossy(value.root().payload()).into_owned(),
                ));
            }
            reply.set_error("hello command required");
            handle.write(reply.wire())?;
            return Err(SesswireError::HelloRequired);
        }
    };

    if cmd.name_eq("command") {
        // Naive textual clients probe capabilities before anything else.
        reply.set_string("ignored");
        handle.write(reply.wire())?;
        return Ok(Step::Continue);
    }
    if !cmd.name_eq("hello") {
        reply.set_error("hello command required");
        handle.write(reply.wire())?;
        return Err(SesswireError::HelloRequired);
    }

    let content_type = cmd
        .arg(0)
        .and_then(|arg| btoi64(arg).ok())
        .and_then(ContentType::from_wire);
    let Some(content_type) = content_type else {
        reply.set_error("unsupported content type");
        handle.write(reply.wire())?;
        return Err(SesswireError::HandshakeRejected(
            "unsupported content type".to_string(),
        ));
    };

    if let Err(err) = events.on_handshake(content_type).await {
        reply.set_error(&err.to_string());
        handle.write(reply.wire())?;
        return Err(SesswireError::HandshakeRejected(err.to_string()));
    }

    handle.shared.set_content_type(content_type);
    if !hello_sent {
        reply.set_string(&format!("hello {}", content_type.wire_value()));
        handle.write(reply.wire())?;
    }
    debug!(%content_type, "handshake complete");
    Ok(Step::Continue)
}

/// Read one binary record and dispatch it to `on_message`.
async fn read_binary_unit<R>(
    reader: &mut BufReader<R>,
    handle: &SessionHandle,
    events: &dyn SessionEventHandler,
    config: &SessionConfig,
) -> Result<Step>
where
    R: AsyncRead + Unpin + Send,
{
    let type_id = match maybe_timeout(config.read_timeout, read_uvarint_stream(reader, true)).await
    {
        Ok(value) => value,
        Err(SesswireError::ConnectionClosed) => return Ok(Step::Close),
        Err(err) => return Err(err),
    };
    if type_id > MAX_TYPE_ID {
        return Err(SesswireError::Overflow {
            subject: "message type",
            value: type_id,
            max: MAX_TYPE_ID,
        });
    }
    let size = maybe_timeout(config.read_timeout, read_uvarint_stream(reader, false)).await?;
    let max = config.max_body_size.min(MAX_BODY_SIZE);
    if size > max {
        return Err(SesswireError::Overflow {
            subject: "message body",
            value: size,
            max,
        });
    }

    let src: &mut (dyn AsyncRead + Unpin + Send) = reader;
    let mut body = BodyReader::new(src, size);
    events.on_message(handle, type_id, &mut body).await?;

    // Bound the handler's influence to its own record: whatever it left
    // unread is discarded before the next header is parsed.
    let leftover = body.remaining();
    if leftover > 0 {
        tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;
        debug!(type_id, leftover, "discarded unread message body");
    }
    Ok(Step::Continue)
}

/// Read one varint from the stream, byte at a time.
///
/// `at_boundary` marks the first byte of a record, where a clean EOF means
/// the peer ended the stream between records.
async fn read_uvarint_stream<R>(reader: &mut R, at_boundary: bool) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut x = 0u64;
    let mut shift = 0u32;
    for i in 0..MAX_VARINT_LEN {
        let b = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && i == 0 && at_boundary => {
                return Err(SesswireError::ConnectionClosed)
            }
            Err(e) => return Err(e.into()),
        };
        if b < 0x80 {
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return Err(SesswireError::VarintOverflow);
            }
            return Ok(x | (u64::from(b) << shift));
        }
        x |= u64::from(b & 0x7F) << shift;
        shift += 7;
    }
    Err(SesswireError::VarintOverflow)
}

/// Write loop task: drain the outbound queue into the connection.
async fn write_loop<W>(mut writer: BufWriter<W>, shared: Arc<Shared>, page_size: usize)
where
    W: AsyncWrite + Unpin + Send,
{
    if let Err(err) = drain_outbound(&mut writer, &shared, page_size).await {
        if is_benign_disconnect(&err) {
            debug!(error = %err, "write loop closed");
        } else {
            warn!(error = %err, "write loop failed");
        }
        shared.set_fatal(err);
        shared.begin_close();
    }
}

async fn drain_outbound<W>(
    writer: &mut BufWriter<W>,
    shared: &Shared,
    page_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut chunk = vec![0u8; page_size];
    loop {
        // Drain everything staged so far, one page-sized chunk per lock
        // hold, so writers are never blocked behind connection I/O.
        loop {
            let n = {
                let mut outbound = shared.outbound.lock().unwrap_or_else(|e| e.into_inner());
                io::Read::read(&mut *outbound, &mut chunk)?
            };
            if n == 0 {
                break;
            }
            writer.write_all(&chunk[..n]).await?;
        }
        writer.flush().await?;
        {
            let mut outbound = shared.outbound.lock().unwrap_or_else(|e| e.into_inner());
            if outbound.is_empty() {
                outbound.reset();
            }
        }

        if shared.closed.load(Ordering::Acquire) {
            let empty = shared
                .outbound
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_empty();
            if empty {
                break;
            }
            // A racing write staged bytes after the drain; go around once
            // more so close never drops staged data.
            continue;
        }

        // Notify stores a permit, so a wake that lands between the drain
        // and this await is not lost.
        shared.wake_writer.notified().await;
    }
    writer.shutdown().await?;
    Ok(())
}
