//! The server lifecycle: one UDP listener and one TCP listener bound to
//! the same address, a task per accepted message, and an idempotent
//! shutdown. TCP messages are framed with the RFC 1035 §4.2.2 two-byte
//! length prefix.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::ServerError;
use crate::events::{EventKind, EventSink, ServerEvent};
use crate::query::{QueryHandler, Transport};
use crate::zone::ZoneResolver;

/// Default EDNS payload size announced to queriers. 1220 stays clear of
/// common path-MTU trouble while leaving room above the classic 512.
pub const DEFAULT_BUFFER_SIZE: u16 = 1220;

/// Receive buffer for a single UDP datagram.
const UDP_RECV_SIZE: usize = 4096;

/// Upper bound on a framed TCP message.
const MAX_TCP_MESSAGE_SIZE: usize = 65535;

/// Configuration for a [`Server`].
pub struct ServerConfig {
    /// EDNS payload size announced in OPT replies.
    pub buffer_size: u16,

    /// Maps each query name to the zone that owns it.
    pub resolver: Arc<dyn ZoneResolver>,

    events: EventSink,
}

impl ServerConfig {
    pub fn new(resolver: Arc<dyn ZoneResolver>) -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            resolver,
            events: EventSink::default(),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: u16) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Opens the server event stream. Every [`ServerEvent`] emitted while
    /// serving is delivered to the returned receiver; without this call
    /// events are dropped at the emission site.
    pub fn with_event_stream(mut self) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.events = EventSink(Some(sender));
        (self, receiver)
    }
}

/// An authoritative DNS server serving the zones of its resolver.
pub struct Server {
    handler: Arc<QueryHandler>,
    events: EventSink,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let events = config.events.clone();
        Self {
            handler: Arc::new(QueryHandler::new(
                config.resolver,
                config.buffer_size,
                config.events,
            )),
            events,
            shutdown: CancellationToken::new(),
        }
    }

    /// Serves UDP and TCP on `addr` until the first listener error or
    /// [`close`](Server::close).
    pub async fn run(&self, addr: &str) -> Result<(), ServerError> {
        let addr: SocketAddr = addr.parse()?;

        let udp = UdpSocket::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!(address = %addr, "dns server listening");

        let (error_tx, mut error_rx) = mpsc::channel::<ServerError>(2);

        let udp_task = tokio::spawn(udp_loop(
            Arc::new(udp),
            self.handler.clone(),
            self.events.clone(),
            self.shutdown.clone(),
            error_tx.clone(),
        ));
        let tcp_task = tokio::spawn(tcp_loop(
            tcp,
            self.handler.clone(),
            self.events.clone(),
            self.shutdown.clone(),
            error_tx,
        ));

        let result = tokio::select! {
            _ = self.shutdown.cancelled() => Ok(()),
            error = error_rx.recv() => match error {
                Some(error) => Err(error),
                None => Ok(()),
            },
        };

        self.shutdown.cancel();
        udp_task.abort();
        tcp_task.abort();

        info!(address = %addr, "dns server stopped");

        result
    }

    /// Stops the listeners. Safe to call more than once and from any
    /// task.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

async fn udp_loop(
    socket: Arc<UdpSocket>,
    handler: Arc<QueryHandler>,
    events: EventSink,
    shutdown: CancellationToken,
    errors: mpsc::Sender<ServerError>,
) {
    let mut buffer = [0u8; UDP_RECV_SIZE];

    loop {
        let (length, peer) = tokio::select! {
            _ = shutdown.cancelled() => return,
            received = socket.recv_from(&mut buffer) => match received {
                Ok(received) => received,
                Err(err) => {
                    error!(error = %err, "udp receive failed");
                    let _ = errors.try_send(ServerError::Io(err));
                    return;
                }
            },
        };

        let message = buffer[..length].to_vec();
        let socket = socket.clone();
        let handler = handler.clone();
        let events = events.clone();

        tokio::spawn(async move {
            let Some(reply) = handler.handle(&message, Transport::Udp).await else {
                return;
            };

            match socket.send_to(&reply, peer).await {
                Ok(_) => events.emit(ServerEvent::new(EventKind::Finish)),
                Err(err) => {
                    warn!(peer = %peer, error = %err, "udp send failed");
                    events.emit(
                        ServerEvent::new(EventKind::NetworkError).with_error(err.to_string()),
                    );
                }
            }
        });
    }
}

async fn tcp_loop(
    listener: TcpListener,
    handler: Arc<QueryHandler>,
    events: EventSink,
    shutdown: CancellationToken,
    errors: mpsc::Sender<ServerError>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!(error = %err, "tcp accept failed");
                    let _ = errors.try_send(ServerError::Io(err));
                    return;
                }
            },
        };

        debug!(peer = %peer, "tcp connection accepted");

        tokio::spawn(serve_tcp(
            stream,
            peer,
            handler.clone(),
            events.clone(),
            shutdown.clone(),
        ));
    }
}

async fn serve_tcp(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<QueryHandler>,
    events: EventSink,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = read_frame(&mut stream) => match frame {
                Ok(Some(message)) => message,
                Ok(None) => return,
                Err(err) => {
                    debug!(peer = %peer, error = %err, "tcp read failed");
                    return;
                }
            },
        };

        // a dropped message leaves the connection open without a reply
        let Some(reply) = handler.handle(&message, Transport::Tcp).await else {
            continue;
        };

        if let Err(err) = write_frame(&mut stream, &reply).await {
            warn!(peer = %peer, error = %err, "tcp send failed");
            events.emit(ServerEvent::new(EventKind::NetworkError).with_error(err.to_string()));
            return;
        }

        events.emit(ServerEvent::new(EventKind::Finish));
    }
}

/// Reads one length-prefixed DNS message. `None` on a clean end of
/// stream.
pub(crate) async fn read_frame<S>(stream: &mut S) -> std::io::Result<Option<Vec<u8>>>
where
    S: AsyncReadExt + Unpin,
{
    let mut length = [0u8; 2];
    match stream.read_exact(&mut length).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let length = u16::from_be_bytes(length) as usize;
    let mut message = vec![0u8; length];
    stream.read_exact(&mut message).await?;

    Ok(Some(message))
}

/// Writes one length-prefixed DNS message.
pub(crate) async fn write_frame<S>(stream: &mut S, message: &[u8]) -> std::io::Result<()>
where
    S: AsyncWriteExt + Unpin,
{
    if message.len() > MAX_TCP_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            "message exceeds the TCP frame limit",
        ));
    }

    stream.write_all(&(message.len() as u16).to_be_bytes()).await?;
    stream.write_all(message).await?;
    stream.flush().await
}
