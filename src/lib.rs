//! Embeddable authoritative DNS server library.
//!
//! A host program describes its zones as [`Zone`] values, plugs record
//! data in through the [`RecordSource`] port and routes query names to
//! zones through the [`ZoneResolver`] port. The [`Server`] then answers
//! RFC 1035 queries over UDP and TCP: positive answers with authority and
//! glue sections, NODATA and NXDOMAIN with the synthesized SOA, in-zone
//! CNAME chain following, EDNS(0) payload negotiation (RFC 6891) and UDP
//! truncation with TCP fallback.
//!
//! Record data is queried per request and never cached, so a backend can
//! compute sets on the fly; sets are revalidated on every answer. The
//! supported record types are A, AAAA, CNAME, MX, NS and TXT.

pub mod client;
pub mod errors;
pub mod events;
mod query;
pub mod record;
pub mod server;
pub mod set;
pub mod util;
pub mod zone;

pub use client::Proto;
pub use errors::{AuthorityError, BoxError, ServerError};
pub use events::{EventKind, ServerEvent};
pub use record::{Record, RecordType};
pub use server::{Server, ServerConfig, DEFAULT_BUFFER_SIZE};
pub use set::{Set, DEFAULT_SET_TTL};
pub use zone::{Lookup, RecordSource, Zone, ZoneResolver};
