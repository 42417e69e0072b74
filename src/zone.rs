//! The zone model: metadata for one authoritative zone, the ports a host
//! implements to plug in record data, and the lookup loop that resolves a
//! question against the zone (RFC 1034 §4.3.2, restricted to authoritative
//! data without wildcards).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{AuthorityError, BoxError};
use crate::record::RecordType;
use crate::set::Set;
use crate::util;

const DEFAULT_REFRESH: Duration = Duration::from_secs(6 * 3600);
const DEFAULT_RETRY: Duration = Duration::from_secs(3600);
const DEFAULT_EXPIRE: Duration = Duration::from_secs(72 * 3600);
const DEFAULT_SOA_TTL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_NS_TTL: Duration = Duration::from_secs(48 * 3600);
const DEFAULT_MIN_TTL: Duration = Duration::from_secs(5 * 60);

/// CNAME chains longer than this are treated as loops.
const MAX_CNAME_CHAIN: usize = 8;

/// Source of the record sets owned by one zone. Implementations receive
/// the zone-relative name (the empty string denotes the apex) and return
/// every set owned at that name, with the set names spelled as full FQDNs.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn records(&self, name: &str) -> Result<Vec<Set>, BoxError>;
}

#[async_trait]
impl<F> RecordSource for F
where
    F: Fn(&str) -> Result<Vec<Set>, BoxError> + Send + Sync,
{
    async fn records(&self, name: &str) -> Result<Vec<Set>, BoxError> {
        (self)(name)
    }
}

/// Maps a query name to the zone that owns it. Called once per query with
/// the lowercased, normalized qname; returning `None` routes the query to
/// REFUSED.
#[async_trait]
pub trait ZoneResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Option<Zone>, BoxError>;
}

#[async_trait]
impl<F> ZoneResolver for F
where
    F: Fn(&str) -> Result<Option<Zone>, BoxError> + Send + Sync,
{
    async fn resolve(&self, name: &str) -> Result<Option<Zone>, BoxError> {
        (self)(name)
    }
}

/// The outcome of a [`Zone::lookup`].
#[derive(Debug)]
pub enum Lookup {
    /// Matching sets, possibly a CNAME chain whose last link leaves the
    /// zone.
    Answer(Vec<Set>),

    /// The name exists but owns no set of the requested types.
    NoRecords,

    /// The name does not exist within the zone.
    NxDomain,
}

/// A single authoritative DNS zone.
#[derive(Clone)]
pub struct Zone {
    /// The fully qualified zone name.
    pub name: String,

    /// The fully qualified name of the primary name server; becomes the
    /// SOA MNAME.
    pub master_name_server: String,

    /// All authoritative name servers for the zone, at least one. Real
    /// deployments should announce two or more.
    pub all_name_servers: Vec<String>,

    /// The zone administrator address; becomes the SOA RNAME. Empty
    /// selects `hostmaster@<name>`.
    pub admin_email: String,

    /// SOA refresh interval. Zero selects 6h.
    pub refresh: Duration,

    /// SOA retry interval. Zero selects 1h. Must stay below `refresh`.
    pub retry: Duration,

    /// SOA expire interval. Zero selects 72h. Must cover `refresh`
    /// plus `retry`.
    pub expire: Duration,

    /// TTL of the synthesized SOA record. Zero selects 15m.
    pub soa_ttl: Duration,

    /// TTL of the emitted NS records. Zero selects 48h.
    pub ns_ttl: Duration,

    /// Minimum TTL for every emitted record, and via the SOA MINIMUM
    /// field the negative-cache TTL (RFC 2308). Zero selects 5m.
    pub min_ttl: Duration,

    /// The backend queried for record sets.
    pub source: Arc<dyn RecordSource>,
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Zone")
            .field("name", &self.name)
            .field("master_name_server", &self.master_name_server)
            .field("all_name_servers", &self.all_name_servers)
            .field("admin_email", &self.admin_email)
            .finish_non_exhaustive()
    }
}

impl Zone {
    pub fn new(
        name: impl Into<String>,
        master_name_server: impl Into<String>,
        all_name_servers: Vec<String>,
        source: Arc<dyn RecordSource>,
    ) -> Self {
        Self {
            name: name.into(),
            master_name_server: master_name_server.into(),
            all_name_servers,
            admin_email: String::new(),
            refresh: DEFAULT_REFRESH,
            retry: DEFAULT_RETRY,
            expire: DEFAULT_EXPIRE,
            soa_ttl: DEFAULT_SOA_TTL,
            ns_ttl: DEFAULT_NS_TTL,
            min_ttl: DEFAULT_MIN_TTL,
            source,
        }
    }

    /// Checks the zone invariants and fills the documented defaults. The
    /// server revalidates on every request, so a zone swapped in through
    /// the resolver is never trusted stale.
    pub fn validate(&mut self) -> Result<(), AuthorityError> {
        if !util::is_domain(&self.name, true) {
            return Err(AuthorityError::NotFullyQualified("zone name"));
        }

        if !util::is_domain(&self.master_name_server, true) {
            return Err(AuthorityError::NotFullyQualified("master name server"));
        }

        if self.all_name_servers.is_empty() {
            return Err(AuthorityError::MissingNameServers);
        }

        for name_server in &self.all_name_servers {
            if !util::is_domain(name_server, true) {
                return Err(AuthorityError::NotFullyQualified("name server"));
            }
        }

        // deterministic NS emission order
        self.all_name_servers.sort();

        if self.admin_email.is_empty() {
            self.admin_email = format!("hostmaster@{}", self.name);
        }

        if !util::is_domain(&util::email_to_mbox(&self.admin_email), true) {
            return Err(AuthorityError::InvalidEmail(self.admin_email.clone()));
        }

        if self.refresh == Duration::ZERO {
            self.refresh = DEFAULT_REFRESH;
        }
        if self.retry == Duration::ZERO {
            self.retry = DEFAULT_RETRY;
        }
        if self.expire == Duration::ZERO {
            self.expire = DEFAULT_EXPIRE;
        }
        if self.soa_ttl == Duration::ZERO {
            self.soa_ttl = DEFAULT_SOA_TTL;
        }
        if self.ns_ttl == Duration::ZERO {
            self.ns_ttl = DEFAULT_NS_TTL;
        }
        if self.min_ttl == Duration::ZERO {
            self.min_ttl = DEFAULT_MIN_TTL;
        }

        if self.retry >= self.refresh {
            return Err(AuthorityError::RetryNotBelowRefresh);
        }

        if self.expire < self.refresh + self.retry {
            return Err(AuthorityError::ExpireTooSmall);
        }

        Ok(())
    }

    pub(crate) fn clamp_ttl(&self, ttl: Duration) -> Duration {
        ttl.max(self.min_ttl)
    }

    /// Resolves `name` against the zone for the requested types.
    ///
    /// A CNAME found where CNAME was not asked for is emitted into the
    /// answer and followed while its target stays inside the zone; a
    /// target outside the zone ends the chain and leaves further
    /// resolution to the client. Chains are bounded so a miswired backend
    /// cannot loop the server.
    pub async fn lookup(
        &self,
        name: &str,
        types: &[RecordType],
    ) -> Result<Lookup, AuthorityError> {
        let name = name.to_ascii_lowercase();
        if !util::in_zone(&self.name, &name) {
            return Err(AuthorityError::NotInZone {
                name,
                zone: self.name.clone(),
            });
        }

        let mut results = Vec::new();
        let mut current = name.clone();

        for _ in 0..MAX_CNAME_CHAIN {
            let mut sets = self
                .source
                .records(&util::trim_zone(&self.name, &current))
                .await
                .map_err(AuthorityError::Source)?;

            // a name the backend knows nothing about never existed
            if sets.is_empty() && current == name {
                return Ok(Lookup::NxDomain);
            }

            let mut types_seen: HashMap<RecordType, usize> = HashMap::new();
            for set in &mut sets {
                set.validate()?;

                if !set.name.eq_ignore_ascii_case(&current) {
                    return Err(AuthorityError::NameMismatch {
                        set: set.name.clone(),
                        queried: current.clone(),
                    });
                }
                if !util::in_zone(&self.name, &set.name) {
                    return Err(AuthorityError::NotInZone {
                        name: set.name.clone(),
                        zone: self.name.clone(),
                    });
                }

                *types_seen.entry(set.record_type).or_insert(0) += 1;
            }

            for (record_type, count) in &types_seen {
                if *count > 1 {
                    return Err(AuthorityError::MultipleSetsForSameType(*record_type));
                }
            }

            if let Some(cname) = sets
                .iter()
                .find(|set| set.record_type == RecordType::CNAME)
            {
                if current.eq_ignore_ascii_case(&self.name) {
                    return Err(AuthorityError::ApexCname);
                }
                if sets.len() > 1 {
                    return Err(AuthorityError::CnameNotStandalone);
                }

                if !types.contains(&RecordType::CNAME) {
                    let target = util::fqdn(&cname.records[0].address).to_ascii_lowercase();
                    results.push(cname.clone());

                    if util::in_zone(&self.name, &target) {
                        current = target;
                        continue;
                    }

                    // the chain leaves the zone; the client resolves on
                    return Ok(Lookup::Answer(results));
                }
            }

            for record_type in types {
                if let Some(set) = sets.iter().find(|set| set.record_type == *record_type) {
                    results.push(set.clone());
                }
            }

            return Ok(if !results.is_empty() {
                Lookup::Answer(results)
            } else if sets.is_empty() {
                Lookup::NxDomain
            } else {
                Lookup::NoRecords
            });
        }

        Err(AuthorityError::CnameChainTooLong(MAX_CNAME_CHAIN))
    }
}
