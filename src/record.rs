//! The record model exposed to zone backends. A [`Record`] is one member
//! of an RRset; its shape is interpreted through the set's [`RecordType`].

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use hickory_proto::rr::rdata;
use hickory_proto::rr::{RData, RecordType as WireType};

use crate::errors::AuthorityError;
use crate::util;

/// The record types this library is able to serve. Everything else is
/// rejected early in query dispatch; `ANY` is recognized only to answer
/// NOTIMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    AAAA,
    CNAME,
    MX,
    NS,
    TXT,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CNAME => "CNAME",
            RecordType::MX => "MX",
            RecordType::NS => "NS",
            RecordType::TXT => "TXT",
        }
    }

    pub fn to_wire(self) -> WireType {
        match self {
            RecordType::A => WireType::A,
            RecordType::AAAA => WireType::AAAA,
            RecordType::CNAME => WireType::CNAME,
            RecordType::MX => WireType::MX,
            RecordType::NS => WireType::NS,
            RecordType::TXT => WireType::TXT,
        }
    }

    pub fn from_wire(wire: WireType) -> Option<Self> {
        match wire {
            WireType::A => Some(RecordType::A),
            WireType::AAAA => Some(RecordType::AAAA),
            WireType::CNAME => Some(RecordType::CNAME),
            WireType::MX => Some(RecordType::MX),
            WireType::NS => Some(RecordType::NS),
            WireType::TXT => Some(RecordType::TXT),
            _ => None,
        }
    }

    /// True when the wire type can be answered from a zone backend.
    pub fn supported(wire: WireType) -> bool {
        Self::from_wire(wire).is_some()
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "CNAME" => Ok(RecordType::CNAME),
            "MX" => Ok(RecordType::MX),
            "NS" => Ok(RecordType::NS),
            "TXT" => Ok(RecordType::TXT),
            _ => Err(format!("unknown record type: {}", s)),
        }
    }
}

/// A single DNS record. `address` carries the IPv4/IPv6 address for A and
/// AAAA records and the target name for CNAME, MX and NS records;
/// `priority` is the MX preference; `data` holds the TXT character
/// strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub address: String,
    pub priority: u16,
    pub data: Vec<String>,
}

impl Record {
    /// A record pointing at an address or target name.
    pub fn addr(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// An MX record with the given preference.
    pub fn mx(priority: u16, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            priority,
            data: Vec::new(),
        }
    }

    /// A TXT record made of character strings.
    pub fn txt(data: Vec<String>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Validates the record against the shape required by `record_type`.
    pub fn validate(&self, record_type: RecordType) -> Result<(), AuthorityError> {
        match record_type {
            RecordType::A => {
                self.address
                    .parse::<Ipv4Addr>()
                    .map_err(|_| AuthorityError::InvalidIpv4(self.address.clone()))?;
            }
            RecordType::AAAA => {
                self.address
                    .parse::<Ipv6Addr>()
                    .map_err(|_| AuthorityError::InvalidIpv6(self.address.clone()))?;
            }
            RecordType::CNAME | RecordType::MX | RecordType::NS => {
                if !util::is_domain(&self.address, true) {
                    return Err(AuthorityError::InvalidFqdn(self.address.clone()));
                }
            }
            RecordType::TXT => {
                if self.data.is_empty() {
                    return Err(AuthorityError::MissingTxtData);
                }
                if self.data.iter().any(|element| element.len() > 255) {
                    return Err(AuthorityError::TxtDataTooLong);
                }
            }
        }

        Ok(())
    }

    /// The key records are ordered by inside a set: TXT by first data
    /// element, MX by zero-padded priority then address, everything else
    /// by address.
    pub(crate) fn sort_key(&self, record_type: RecordType) -> String {
        match record_type {
            RecordType::TXT => self.data.first().cloned().unwrap_or_default(),
            RecordType::MX => format!("{:05} {}", self.priority, self.address),
            _ => self.address.clone(),
        }
    }

    pub(crate) fn to_rdata(&self, record_type: RecordType) -> Result<RData, AuthorityError> {
        match record_type {
            RecordType::A => {
                let address = self
                    .address
                    .parse::<Ipv4Addr>()
                    .map_err(|_| AuthorityError::InvalidIpv4(self.address.clone()))?;
                Ok(RData::A(rdata::A(address)))
            }
            RecordType::AAAA => {
                let address = self
                    .address
                    .parse::<Ipv6Addr>()
                    .map_err(|_| AuthorityError::InvalidIpv6(self.address.clone()))?;
                Ok(RData::AAAA(rdata::AAAA(address)))
            }
            RecordType::CNAME => {
                let target = util::wire_name(&util::fqdn(&self.address))?;
                Ok(RData::CNAME(rdata::CNAME(target)))
            }
            RecordType::MX => {
                let exchange = util::wire_name(&util::fqdn(&self.address))?;
                Ok(RData::MX(rdata::MX::new(self.priority, exchange)))
            }
            RecordType::NS => {
                let target = util::wire_name(&util::fqdn(&self.address))?;
                Ok(RData::NS(rdata::NS(target)))
            }
            RecordType::TXT => Ok(RData::TXT(rdata::TXT::new(self.data.clone()))),
        }
    }
}
