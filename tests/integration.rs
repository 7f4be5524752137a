//! Integration tests for sesswire.
//!
//! Each test drives a full session over an in-memory duplex stream: raw
//! bytes on one end, a [`Session`] with recording handlers on the other.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use sesswire::codec::{decode, encode, Message, MessageRegistry};
use sesswire::error::{Result, SesswireError};
use sesswire::session::{
    BodyReader, CommandHandler, ContentType, Session, SessionEventHandler, SessionHandle,
};
use sesswire::textual::{Command, Value};

const WAIT: Duration = Duration::from_secs(5);

/// Event handler that records everything the session tells it.
#[derive(Default)]
struct Recorder {
    handle: Mutex<Option<SessionHandle>>,
    handshakes: Mutex<Vec<ContentType>>,
    messages: Mutex<Vec<(u64, Vec<u8>)>>,
    close_errors: Mutex<Vec<Option<String>>>,
    close_count: AtomicUsize,
    /// When set, read at most this many body bytes per message.
    read_limit: Option<usize>,
}

impl Recorder {
    fn with_read_limit(limit: usize) -> Self {
        Self {
            read_limit: Some(limit),
            ..Self::default()
        }
    }

    fn handle(&self) -> Option<SessionHandle> {
        self.handle.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionEventHandler for Recorder {
    async fn on_open(&self, session: &SessionHandle) {
        *self.handle.lock().unwrap() = Some(session.clone());
    }

    async fn on_close(&self, err: Option<&SesswireError>) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.close_errors
            .lock()
            .unwrap()
            .push(err.map(|e| e.to_string()));
    }

    async fn on_handshake(&self, content_type: ContentType) -> Result<()> {
        self.handshakes.lock().unwrap().push(content_type);
        Ok(())
    }

    async fn on_message(
        &self,
        _session: &SessionHandle,
        type_id: u64,
        body: &mut BodyReader<'_>,
    ) -> Result<()> {
        let data = match self.read_limit {
            Some(limit) => {
                let take = limit.min(body.remaining() as usize);
                let mut buf = vec![0u8; take];
                if take > 0 {
                    body.read_exact(&mut buf).await?;
                }
                buf
            }
            None => {
                let mut buf = Vec::new();
                body.read_to_end(&mut buf).await?;
                buf
            }
        };
        self.messages.lock().unwrap().push((type_id, data));
        Ok(())
    }
}

/// Command handler serving `ping`/`echo`, recording what it saw.
#[derive(Default)]
struct PingCommands {
    seen: Mutex<Vec<String>>,
    reply: bool,
}

#[async_trait]
impl CommandHandler for PingCommands {
    fn commands(&self) -> &[&str] {
        &["ping", "echo"]
    }

    async fn on_command(&self, session: &SessionHandle, cmd: &Command<'_>) -> Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(cmd.name()).to_string());
        if self.reply {
            let mut reply = Value::new();
            reply.set_string("PONG");
            session.write_value(&reply)?;
        }
        Ok(())
    }
}

/// Binary message used by the echo tests.
#[derive(Debug, Default, PartialEq, Eq)]
struct EchoMsg {
    text: Vec<u8>,
}

impl EchoMsg {
    const TYPE: u64 = 9;
}

impl Message for EchoMsg {
    fn type_id(&self) -> u64 {
        Self::TYPE
    }

    fn body_len(&self) -> usize {
        self.text.len()
    }

    fn encode_body(&self, buf: &mut bytes::BytesMut) {
        buf.extend_from_slice(&self.text);
    }

    fn decode_body(&mut self, body: &[u8]) -> Result<()> {
        self.text.clear();
        self.text.extend_from_slice(body);
        Ok(())
    }
}

/// Event handler that echoes every binary message back to the peer.
struct EchoEvents;

#[async_trait]
impl SessionEventHandler for EchoEvents {
    async fn on_message(
        &self,
        session: &SessionHandle,
        _type_id: u64,
        body: &mut BodyReader<'_>,
    ) -> Result<()> {
        let mut text = Vec::new();
        body.read_to_end(&mut text).await?;
        session.write_message(&EchoMsg { text })?;
        Ok(())
    }
}

fn spawn_server(
    events: Arc<Recorder>,
    commands: Option<Arc<PingCommands>>,
    conn: DuplexStream,
) -> JoinHandle<Result<()>> {
    let mut session = Session::new().events_arc(events);
    if let Some(commands) = commands {
        session = session.commands_arc(commands);
    }
    tokio::spawn(session.serve(conn))
}

async fn read_exactly(client: &mut DuplexStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    tokio::time::timeout(WAIT, client.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

async fn wait_until(mut probe: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !probe() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_textual_handshake_and_dispatch() {
    let (mut client, server_end) = duplex(64 * 1024);
    let events = Arc::new(Recorder::default());
    let commands = Arc::new(PingCommands {
        reply: true,
        ..PingCommands::default()
    });
    let server = spawn_server(events.clone(), Some(commands.clone()), server_end);

    client.write_all(b"+hello 2\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 10).await, b"+hello 2\r\n");

    client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 7).await, b"+PONG\r\n");

    drop(client);
    let result = server.await.unwrap();
    assert!(result.is_ok(), "clean shutdown expected: {result:?}");

    assert_eq!(*events.handshakes.lock().unwrap(), vec![ContentType::Text]);
    assert_eq!(*commands.seen.lock().unwrap(), vec!["PING".to_string()]);
    assert_eq!(events.close_count.load(Ordering::SeqCst), 1);
    assert_eq!(*events.close_errors.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn test_handshake_gate_rejects_early_commands() {
    let (mut client, server_end) = duplex(64 * 1024);
    let events = Arc::new(Recorder::default());
    let commands = Arc::new(PingCommands::default());
    let server = spawn_server(events.clone(), Some(commands.clone()), server_end);

    client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

    let mut reply = Vec::new();
    tokio::time::timeout(WAIT, client.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, b"-hello command required\r\n");

    let result = server.await.unwrap();
    assert!(matches!(result, Err(SesswireError::HelloRequired)));

    // No handler ran before the handshake, and close fired exactly once
    // with the terminal error.
    assert!(commands.seen.lock().unwrap().is_empty());
    assert!(events.handshakes.lock().unwrap().is_empty());
    assert_eq!(events.close_count.load(Ordering::SeqCst), 1);
    assert_eq!(
        *events.close_errors.lock().unwrap(),
        vec![Some("hello command required".to_string())]
    );
}

#[tokio::test]
async fn test_command_probe_is_ignored_before_handshake() {
    let (mut client, server_end) = duplex(64 * 1024);
    let events = Arc::new(Recorder::default());
    let server = spawn_server(events.clone(), None, server_end);

    client.write_all(b"command\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 10).await, b"+ignored\r\n");

    client.write_all(b"+hello 2\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 10).await, b"+hello 2\r\n");

    drop(client);
    assert!(server.await.unwrap().is_ok());
    assert_eq!(*events.handshakes.lock().unwrap(), vec![ContentType::Text]);
}

#[tokio::test]
async fn test_binary_messages_with_partial_reads() {
    let (mut client, server_end) = duplex(64 * 1024);
    // The handler reads only three body bytes; the session must discard the
    // rest so the next record still frames correctly.
    let events = Arc::new(Recorder::with_read_limit(3));
    let server = spawn_server(events.clone(), None, server_end);

    client.write_all(b"+hello 1\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 10).await, b"+hello 1\r\n");

    // type 5, size 8, body "abcdefgh"
    client.write_all(&[5, 8]).await.unwrap();
    client.write_all(b"abcdefgh").await.unwrap();
    // type 6, size 3, body "xyz"
    client.write_all(&[6, 3]).await.unwrap();
    client.write_all(b"xyz").await.unwrap();

    wait_until(|| events.messages.lock().unwrap().len() == 2).await;
    drop(client);
    assert!(server.await.unwrap().is_ok());

    let messages = events.messages.lock().unwrap();
    assert_eq!(messages[0], (5, b"abc".to_vec()));
    assert_eq!(messages[1], (6, b"xyz".to_vec()));
    assert_eq!(*events.handshakes.lock().unwrap(), vec![ContentType::Binary]);
}

#[tokio::test]
async fn test_binary_echo_round_trip() {
    let (mut client, server_end) = duplex(64 * 1024);
    let server = tokio::spawn(Session::new().events(EchoEvents).serve(server_end));

    client.write_all(b"+hello 1\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 10).await, b"+hello 1\r\n");

    let request = encode(&EchoMsg {
        text: b"ping-pong".to_vec(),
    })
    .unwrap();
    client.write_all(&request).await.unwrap();

    // The echoed record is byte-identical, so its wire length matches.
    let reply = read_exactly(&mut client, request.len()).await;
    let mut registry = MessageRegistry::new();
    registry
        .register("test", EchoMsg::TYPE, EchoMsg::default)
        .unwrap();
    let (consumed, msg) = decode(&reply, &registry, None).unwrap();
    assert_eq!(consumed, reply.len());
    assert_eq!(msg.type_id(), EchoMsg::TYPE);
    assert_eq!(msg.body_len(), b"ping-pong".len());

    drop(client);
    assert!(server.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_binary_type_overflow_is_terminal() {
    let (mut client, server_end) = duplex(64 * 1024);
    let events = Arc::new(Recorder::default());
    let server = spawn_server(events.clone(), None, server_end);

    client.write_all(b"+hello 1\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 10).await, b"+hello 1\r\n");

    // varint(2^31 + 1) as the record type
    let mut header = bytes::BytesMut::new();
    sesswire::codec::put_uvarint(&mut header, (1u64 << 31) + 1);
    client.write_all(&header).await.unwrap();

    let result = server.await.unwrap();
    assert!(matches!(
        result,
        Err(SesswireError::Overflow {
            subject: "message type",
            ..
        })
    ));
    assert_eq!(events.close_count.load(Ordering::SeqCst), 1);
    assert!(events.close_errors.lock().unwrap()[0]
        .as_deref()
        .unwrap()
        .contains("exceeds maximum"));
}

#[tokio::test]
async fn test_unknown_command_and_repeated_hello() {
    let (mut client, server_end) = duplex(64 * 1024);
    let events = Arc::new(Recorder::default());
    let commands = Arc::new(PingCommands {
        reply: true,
        ..PingCommands::default()
    });
    let server = spawn_server(events.clone(), Some(commands.clone()), server_end);

    client.write_all(b"+hello 2\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 10).await, b"+hello 2\r\n");

    client.write_all(b"*1\r\n$3\r\nFOO\r\n").await.unwrap();
    assert_eq!(
        read_exactly(&mut client, 24).await,
        b"-unknown command 'FOO'\r\n"
    );

    client.write_all(b"hello 2\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 20).await, b"-don't hello again\r\n");

    // The session survives both rejections.
    client.write_all(b"PING\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 7).await, b"+PONG\r\n");

    drop(client);
    assert!(server.await.unwrap().is_ok());
    assert_eq!(*commands.seen.lock().unwrap(), vec!["PING".to_string()]);
}

#[tokio::test]
async fn test_concurrent_writes_do_not_interleave() {
    const WRITERS: usize = 8;
    const CHUNK: usize = 1000;
    const CHUNKS_PER_WRITER: usize = 20;

    let (mut client, server_end) = duplex(16 * 1024);
    let events = Arc::new(Recorder::default());
    let server = spawn_server(events.clone(), None, server_end);

    wait_until(|| events.handle().is_some()).await;
    let handle = events.handle().unwrap();

    let mut writers = Vec::new();
    for writer in 0..WRITERS {
        let handle = handle.clone();
        writers.push(tokio::spawn(async move {
            let chunk = vec![writer as u8; CHUNK];
            for _ in 0..CHUNKS_PER_WRITER {
                handle.write(&chunk).unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    let total = WRITERS * CHUNKS_PER_WRITER * CHUNK;
    let received = read_exactly(&mut client, total).await;
    for task in writers {
        task.await.unwrap();
    }

    // Every chunk must appear contiguously: the stream decomposes into
    // uniform CHUNK-sized blocks.
    let mut counts = [0usize; WRITERS];
    for block in received.chunks(CHUNK) {
        let tag = block[0];
        assert!(block.iter().all(|&b| b == tag), "interleaved chunk");
        counts[tag as usize] += 1;
    }
    assert!(counts.iter().all(|&c| c == CHUNKS_PER_WRITER));

    handle.close();
    assert!(server.await.unwrap().is_ok());

    // Writes after close fail and reach the connection no more.
    assert!(matches!(
        handle.write(b"late"),
        Err(SesswireError::ConnectionClosed)
    ));
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    assert_eq!(events.close_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_peer_drop_mid_record_is_an_io_error() {
    let (mut client, server_end) = duplex(64 * 1024);
    let events = Arc::new(Recorder::default());
    let commands = Arc::new(PingCommands::default());
    let server = spawn_server(events.clone(), Some(commands), server_end);

    client.write_all(b"+hello 2\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 10).await, b"+hello 2\r\n");

    // A bulk string that never finishes.
    client.write_all(b"*2\r\n$3\r\nab").await.unwrap();
    drop(client);

    let result = server.await.unwrap();
    assert!(matches!(result, Err(SesswireError::Io(_))));
    assert_eq!(events.close_count.load(Ordering::SeqCst), 1);
    assert!(events.close_errors.lock().unwrap()[0].is_some());
}

#[tokio::test]
async fn test_initiator_and_acceptor_pair() {
    let (initiator_end, acceptor_end) = duplex(64 * 1024);

    let initiator_events = Arc::new(Recorder::default());
    let initiator = tokio::spawn(
        Session::new()
            .initiate(ContentType::Text)
            .events_arc(initiator_events.clone())
            .serve(initiator_end),
    );

    let acceptor_events = Arc::new(Recorder::default());
    let acceptor_commands = Arc::new(PingCommands::default());
    let acceptor = spawn_server(
        acceptor_events.clone(),
        Some(acceptor_commands.clone()),
        acceptor_end,
    );

    // Both sides observe the same negotiated content type.
    wait_until(|| {
        !initiator_events.handshakes.lock().unwrap().is_empty()
            && !acceptor_events.handshakes.lock().unwrap().is_empty()
    })
    .await;
    assert_eq!(
        *initiator_events.handshakes.lock().unwrap(),
        vec![ContentType::Text]
    );
    assert_eq!(
        *acceptor_events.handshakes.lock().unwrap(),
        vec![ContentType::Text]
    );

    // A command staged on the initiator reaches the acceptor's handler.
    let handle = initiator_events.handle().unwrap();
    handle.write(b"*1\r\n$4\r\nPING\r\n").unwrap();
    wait_until(|| !acceptor_commands.seen.lock().unwrap().is_empty()).await;

    handle.close();
    assert!(initiator.await.unwrap().is_ok());
    assert!(acceptor.await.unwrap().is_ok());
    assert_eq!(initiator_events.close_count.load(Ordering::SeqCst), 1);
    assert_eq!(acceptor_events.close_count.load(Ordering::SeqCst), 1);
}
