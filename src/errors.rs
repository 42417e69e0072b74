use std::net::SocketAddr;

use thiserror::Error;

use crate::record::RecordType;

/// Opaque error type carried across the host-provided ports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Faults in zone definitions, record sets, or lookups. All of these
/// collapse to SERVFAIL when hit while answering a query; the cause is
/// reported through tracing and the event stream, never in the DNS
/// payload.
#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("{0} is not fully qualified")]
    NotFullyQualified(&'static str),

    #[error("zone announces no name servers")]
    MissingNameServers,

    #[error("admin email cannot be represented as a domain name: {0}")]
    InvalidEmail(String),

    #[error("retry interval must be less than the refresh interval")]
    RetryNotBelowRefresh,

    #[error("expire interval must cover refresh plus retry")]
    ExpireTooSmall,

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("name {name} is not inside zone {zone}")]
    NotInZone { name: String, zone: String },

    #[error("set name {set} does not match queried name {queried}")]
    NameMismatch { set: String, queried: String },

    #[error("set has no records")]
    MissingRecords,

    #[error("invalid IPv4 address: {0}")]
    InvalidIpv4(String),

    #[error("invalid IPv6 address: {0}")]
    InvalidIpv6(String),

    #[error("address is not a fully qualified domain name: {0}")]
    InvalidFqdn(String),

    #[error("TXT data element exceeds 255 bytes")]
    TxtDataTooLong,

    #[error("TXT record carries no data")]
    MissingTxtData,

    #[error("duplicate address: {0}")]
    DuplicateAddress(String),

    #[error("multiple CNAME records in one set")]
    MultipleCnameRecords,

    #[error("multiple sets for type {0}")]
    MultipleSetsForSameType(RecordType),

    #[error("CNAME set at the zone apex")]
    ApexCname,

    #[error("CNAME set is not stand-alone")]
    CnameNotStandalone,

    #[error("CNAME chain exceeded {0} links")]
    CnameChainTooLong(usize),

    #[error("record source failed: {0}")]
    Source(#[source] BoxError),

    #[error("zone resolver failed: {0}")]
    Resolver(#[source] BoxError),
}

/// Transport-level faults from the listeners and the one-shot client.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid listen address: {0}")]
    InvalidAddr(#[from] std::net::AddrParseError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    #[error("query timed out")]
    Timeout,
}
