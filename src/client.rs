//! A one-shot DNS client, enough to probe a server from tests or example
//! programs: build a single-question message, optionally mutate it, send
//! it over UDP or TCP, and decode the reply.

use std::str::FromStr;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, RecordType as WireType};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::errors::ServerError;
use crate::server::{read_frame, write_frame};

/// The transport to query over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Udp,
    Tcp,
}

const QUERY_TIMEOUT: Duration = Duration::from_secs(1);
const UDP_REPLY_SIZE: usize = 65535;

/// Sends a single question to `addr` and returns the decoded reply. The
/// `mutate` hook can adjust the request before it is sent (set EDNS,
/// clear flags). The reply ID is zeroed so messages compare whole.
pub async fn query<F>(
    proto: Proto,
    addr: &str,
    name: &str,
    record_type: WireType,
    mutate: F,
) -> Result<Message, ServerError>
where
    F: FnOnce(&mut Message),
{
    let mut question = Query::new();
    question.set_name(Name::from_str(name)?);
    question.set_query_type(record_type);
    question.set_query_class(DNSClass::IN);

    let mut request = Message::new();
    request.set_id(fastrand::u16(..));
    request.set_message_type(MessageType::Query);
    request.set_op_code(OpCode::Query);
    request.add_query(question);
    mutate(&mut request);

    let wire = request.to_vec()?;
    let reply = match proto {
        Proto::Udp => exchange_udp(addr, &wire).await?,
        Proto::Tcp => exchange_tcp(addr, &wire).await?,
    };

    let mut message = Message::from_vec(&reply)?;
    message.set_id(0);
    Ok(message)
}

async fn exchange_udp(addr: &str, wire: &[u8]) -> Result<Vec<u8>, ServerError> {
    let ipv6 = addr
        .parse::<std::net::SocketAddr>()
        .map(|parsed| parsed.is_ipv6())
        .unwrap_or(false);
    let socket = UdpSocket::bind(if ipv6 { "[::]:0" } else { "0.0.0.0:0" }).await?;

    timeout(QUERY_TIMEOUT, socket.send_to(wire, addr))
        .await
        .map_err(|_| ServerError::Timeout)??;

    let mut buffer = vec![0u8; UDP_REPLY_SIZE];
    let (length, _) = timeout(QUERY_TIMEOUT, socket.recv_from(&mut buffer))
        .await
        .map_err(|_| ServerError::Timeout)??;
    buffer.truncate(length);

    Ok(buffer)
}

async fn exchange_tcp(addr: &str, wire: &[u8]) -> Result<Vec<u8>, ServerError> {
    let mut stream = timeout(QUERY_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| ServerError::Timeout)??;

    timeout(QUERY_TIMEOUT, write_frame(&mut stream, wire))
        .await
        .map_err(|_| ServerError::Timeout)??;

    let frame = timeout(QUERY_TIMEOUT, read_frame(&mut stream))
        .await
        .map_err(|_| ServerError::Timeout)??;

    frame.ok_or_else(|| {
        ServerError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before the reply",
        ))
    })
}
