//! RRsets as returned by zone backends. A [`Set`] groups every record of
//! one type owned by one name, and is revalidated on every query since
//! backends are free to compute sets on the fly.

use std::time::Duration;

use hickory_proto::rr::{DNSClass, Record as WireRecord};

use crate::errors::AuthorityError;
use crate::record::{Record, RecordType};
use crate::util;
use crate::zone::Zone;

/// TTL applied to sets that do not specify one.
pub const DEFAULT_SET_TTL: Duration = Duration::from_secs(5 * 60);

/// A set of records sharing name and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Set {
    /// The fully qualified owner name of the set.
    pub name: String,

    /// The type shared by all records in the set.
    pub record_type: RecordType,

    /// The records in the set, kept in canonical order by [`validate`].
    ///
    /// [`validate`]: Set::validate
    pub records: Vec<Record>,

    /// The TTL of the set. A zero duration selects [`DEFAULT_SET_TTL`].
    pub ttl: Duration,
}

impl Set {
    pub fn new(name: impl Into<String>, record_type: RecordType, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            record_type,
            records,
            ttl: Duration::ZERO,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Checks the set invariants, sorts the records into canonical order
    /// and fills the default TTL.
    pub fn validate(&mut self) -> Result<(), AuthorityError> {
        if !util::is_domain(&self.name, true) {
            return Err(AuthorityError::InvalidName(self.name.clone()));
        }

        if self.records.is_empty() {
            return Err(AuthorityError::MissingRecords);
        }

        if self.record_type == RecordType::CNAME && self.records.len() > 1 {
            return Err(AuthorityError::MultipleCnameRecords);
        }

        for record in &self.records {
            record.validate(self.record_type)?;
        }

        let record_type = self.record_type;
        if !self
            .records
            .windows(2)
            .all(|pair| pair[0].sort_key(record_type) <= pair[1].sort_key(record_type))
        {
            self.records
                .sort_by_key(|record| record.sort_key(record_type));
        }

        if self.record_type != RecordType::TXT {
            for pair in self.records.windows(2) {
                if pair[0].address == pair[1].address {
                    return Err(AuthorityError::DuplicateAddress(pair[0].address.clone()));
                }
            }
        }

        if self.ttl == Duration::ZERO {
            self.ttl = DEFAULT_SET_TTL;
        }

        Ok(())
    }

    /// Converts the set to wire records owned by `owner`, clamping the TTL
    /// to the zone minimum.
    pub(crate) fn to_wire(
        &self,
        zone: &Zone,
        owner: &str,
    ) -> Result<Vec<WireRecord>, AuthorityError> {
        let name = util::wire_name(owner)?;
        let ttl = util::duration_to_secs(zone.clamp_ttl(self.ttl));

        let mut records = Vec::with_capacity(self.records.len());
        for record in &self.records {
            let rdata = record.to_rdata(self.record_type)?;
            let mut wire = WireRecord::from_rdata(name.clone(), ttl, rdata);
            wire.set_dns_class(DNSClass::IN);
            records.push(wire);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_orders_records() {
        let mut set = Set::new(
            "example.com.",
            RecordType::A,
            vec![Record::addr("9.9.9.9"), Record::addr("1.2.3.4")],
        );
        set.validate().unwrap();
        assert_eq!(set.records[0].address, "1.2.3.4");
        assert_eq!(set.records[1].address, "9.9.9.9");
        assert_eq!(set.ttl, DEFAULT_SET_TTL);
    }

    #[test]
    fn test_validate_orders_mx_by_priority() {
        let mut set = Set::new(
            "example.com.",
            RecordType::MX,
            vec![
                Record::mx(20, "a.example.com."),
                Record::mx(7, "b.example.com."),
                Record::mx(7, "a.example.com."),
            ],
        );
        set.validate().unwrap();
        assert_eq!(set.records[0].address, "a.example.com.");
        assert_eq!(set.records[0].priority, 7);
        assert_eq!(set.records[1].address, "b.example.com.");
        assert_eq!(set.records[2].priority, 20);
    }

    #[test]
    fn test_validate_orders_txt_by_data() {
        let mut set = Set::new(
            "example.com.",
            RecordType::TXT,
            vec![
                Record::txt(vec!["foo".into(), "bar".into()]),
                Record::txt(vec!["baz".into()]),
            ],
        );
        set.validate().unwrap();
        assert_eq!(set.records[0].data[0], "baz");
        assert_eq!(set.records[1].data[0], "foo");
    }

    #[test]
    fn test_validate_rejects_bad_sets() {
        let mut unqualified = Set::new("example.com", RecordType::A, vec![Record::addr("1.2.3.4")]);
        assert!(matches!(
            unqualified.validate(),
            Err(AuthorityError::InvalidName(_))
        ));

        let mut empty = Set::new("example.com.", RecordType::A, Vec::new());
        assert!(matches!(empty.validate(), Err(AuthorityError::MissingRecords)));

        let mut cnames = Set::new(
            "foo.example.com.",
            RecordType::CNAME,
            vec![Record::addr("a.example.com."), Record::addr("b.example.com.")],
        );
        assert!(matches!(
            cnames.validate(),
            Err(AuthorityError::MultipleCnameRecords)
        ));

        let mut duplicates = Set::new(
            "example.com.",
            RecordType::A,
            vec![Record::addr("1.2.3.4"), Record::addr("1.2.3.4")],
        );
        assert!(matches!(
            duplicates.validate(),
            Err(AuthorityError::DuplicateAddress(_))
        ));
    }

    #[test]
    fn test_validate_keeps_explicit_ttl() {
        let mut set = Set::new("example.com.", RecordType::A, vec![Record::addr("1.2.3.4")])
            .with_ttl(Duration::from_secs(60));
        set.validate().unwrap();
        assert_eq!(set.ttl, Duration::from_secs(60));
    }
}
