//! The query state machine: accept filtering, zone dispatch, RFC 1034
//! response construction, EDNS(0) handling (RFC 6891) and UDP truncation.
//!
//! Every backend fault is collapsed to SERVFAIL here; causes reach the
//! operator through tracing and the event stream, never the wire.

use std::sync::Arc;

use hickory_proto::op::{Edns, Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{rdata, DNSClass, RData, Record as WireRecord, RecordType as WireType};
use tracing::{debug, error, warn};

use crate::errors::AuthorityError;
use crate::events::{EventKind, EventSink, ServerEvent};
use crate::record::RecordType;
use crate::set::Set;
use crate::util;
use crate::zone::{Lookup, Zone, ZoneResolver};

/// Payload limit assumed for queriers that do not announce one via OPT
/// (RFC 1035 §4.2.1).
const CLASSIC_UDP_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transport {
    Udp,
    Tcp,
}

pub(crate) struct QueryHandler {
    resolver: Arc<dyn ZoneResolver>,
    buffer_size: u16,
    events: EventSink,
}

impl QueryHandler {
    pub(crate) fn new(
        resolver: Arc<dyn ZoneResolver>,
        buffer_size: u16,
        events: EventSink,
    ) -> Self {
        Self {
            resolver,
            buffer_size,
            events,
        }
    }

    /// Turns one received message into one encoded reply. `None` means
    /// the message is dropped without an answer; leaving the peer hanging
    /// sheds reflection and probing traffic.
    pub(crate) async fn handle(&self, buffer: &[u8], transport: Transport) -> Option<Vec<u8>> {
        let request = match Message::from_vec(buffer) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "dropping unreadable message");
                self.ignore("unreadable message");
                return None;
            }
        };

        if request.message_type() != MessageType::Query {
            self.ignore("message is not a request");
            return None;
        }

        if request.op_code() != OpCode::Query {
            self.ignore("opcode is not query");
            return None;
        }

        if request.queries().len() != 1 {
            self.ignore("question count is not one");
            return None;
        }

        let response = self.process(&request).await?;
        self.finalize(&request, response, transport)
    }

    fn ignore(&self, reason: &'static str) {
        debug!(reason, "ignoring message");
        self.events
            .emit(ServerEvent::new(EventKind::Ignored).with_reason(reason));
    }

    async fn process(&self, request: &Message) -> Option<Message> {
        let question = &request.queries()[0];

        // non-IN classes are dropped, not answered
        if question.query_class() != DNSClass::IN {
            self.ignore("query class is not IN");
            return None;
        }

        let qname_raw = question.name().to_utf8();
        let qname = qname_raw.to_ascii_lowercase();
        let qtype = question.query_type();
        let question_line = format!("{} {}", qname, qtype);

        debug!(name = %qname, record_type = %qtype, "handling question");
        self.events
            .emit(ServerEvent::new(EventKind::Request).with_message(question_line.clone()));

        if let Some(edns) = request.extensions() {
            if edns.version() != 0 {
                debug!(version = edns.version(), "unsupported EDNS version");
                return Some(self.failure(request, ResponseCode::BADVERS));
            }
        }

        let zone = match self.resolver.resolve(&qname).await {
            Ok(zone) => zone,
            Err(err) => {
                warn!(name = %qname, error = %err, "zone resolver failed");
                self.events.emit(
                    ServerEvent::new(EventKind::BackendError)
                        .with_message(question_line.clone())
                        .with_error(err.to_string()),
                );
                return Some(self.failure(request, ResponseCode::ServFail));
            }
        };

        let Some(mut zone) = zone else {
            debug!(name = %qname, "no zone claims the name");
            self.events
                .emit(ServerEvent::new(EventKind::Refused).with_message(question_line));
            return Some(self.failure(request, ResponseCode::Refused));
        };

        if let Err(err) = zone.validate() {
            warn!(zone = %zone.name, error = %err, "zone failed validation");
            self.events.emit(
                ServerEvent::new(EventKind::BackendError)
                    .with_message(question_line)
                    .with_error(err.to_string()),
            );
            return Some(self.failure(request, ResponseCode::ServFail));
        }

        match self.dispatch(request, &zone, &qname_raw, &qname, qtype).await {
            Ok(response) => Some(response),
            Err(err) => {
                warn!(zone = %zone.name, error = %err, "query dispatch failed");
                self.events.emit(
                    ServerEvent::new(EventKind::BackendError)
                        .with_message(format!("{} {}", qname, qtype))
                        .with_error(err.to_string()),
                );
                Some(self.failure(request, ResponseCode::ServFail))
            }
        }
    }

    async fn dispatch(
        &self,
        request: &Message,
        zone: &Zone,
        qname_raw: &str,
        qname: &str,
        qtype: WireType,
    ) -> Result<Message, AuthorityError> {
        if qtype == WireType::ANY {
            return Ok(self.failure(request, ResponseCode::NotImp));
        }

        let apex = qname.eq_ignore_ascii_case(&zone.name);

        if apex && qtype == WireType::SOA {
            let mut response = self.reply(request);
            response.add_answer(self.soa_record(zone)?);
            for record in self.ns_records(zone)? {
                response.add_name_server(record);
            }
            return Ok(response);
        }

        if apex && qtype == WireType::NS {
            let mut response = self.reply(request);
            for record in self.ns_records(zone)? {
                response.add_answer(record);
            }
            return Ok(response);
        }

        // the server is authoritative and the type is unreachable
        // through it, so the name is reported as absent
        let Some(record_type) = RecordType::from_wire(qtype) else {
            return self.negative(request, zone, ResponseCode::NXDomain);
        };

        match zone.lookup(qname, &[record_type]).await? {
            Lookup::NxDomain => self.negative(request, zone, ResponseCode::NXDomain),
            Lookup::NoRecords => self.negative(request, zone, ResponseCode::NoError),
            Lookup::Answer(sets) => self.answer(request, zone, qname_raw, sets).await,
        }
    }

    async fn answer(
        &self,
        request: &Message,
        zone: &Zone,
        qname_raw: &str,
        sets: Vec<Set>,
    ) -> Result<Message, AuthorityError> {
        let mut response = self.reply(request);

        for set in &sets {
            let owner = util::transfer_case(qname_raw, &set.name);
            for record in set.to_wire(zone, &owner)? {
                response.add_answer(record);
            }
        }

        for record in self.ns_records(zone)? {
            response.add_name_server(record);
        }

        // A/AAAA glue for MX targets inside the zone; targets outside
        // are left to the client
        for set in sets.iter().filter(|set| set.record_type == RecordType::MX) {
            for mx in &set.records {
                let target = util::fqdn(&mx.address).to_ascii_lowercase();
                if !util::in_zone(&zone.name, &target) {
                    continue;
                }

                let glue = zone
                    .lookup(&target, &[RecordType::A, RecordType::AAAA])
                    .await?;
                if let Lookup::Answer(glue_sets) = glue {
                    for glue_set in &glue_sets {
                        for record in glue_set.to_wire(zone, &glue_set.name)? {
                            response.add_additional(record);
                        }
                    }
                }
            }
        }

        Ok(response)
    }

    /// An authoritative NODATA or NXDOMAIN reply: empty answer, the
    /// synthesized SOA in authority so caches learn the negative TTL
    /// (RFC 2308).
    fn negative(
        &self,
        request: &Message,
        zone: &Zone,
        code: ResponseCode,
    ) -> Result<Message, AuthorityError> {
        let mut response = self.reply(request);
        response.set_response_code(code);
        response.add_name_server(self.soa_record(zone)?);
        Ok(response)
    }

    /// An authoritative reply skeleton echoing the question.
    fn reply(&self, request: &Message) -> Message {
        let mut response = Message::new();
        response.set_id(request.id());
        response.set_message_type(MessageType::Response);
        response.set_op_code(OpCode::Query);
        response.set_authoritative(true);
        response.set_recursion_desired(request.recursion_desired());
        response.set_recursion_available(false);
        for query in request.queries() {
            response.add_query(query.clone());
        }
        response
    }

    /// A non-authoritative error reply carrying only the question.
    fn failure(&self, request: &Message, code: ResponseCode) -> Message {
        let mut response = Message::new();
        response.set_id(request.id());
        response.set_message_type(MessageType::Response);
        response.set_op_code(OpCode::Query);
        response.set_recursion_desired(request.recursion_desired());
        response.set_response_code(code);
        for query in request.queries() {
            response.add_query(query.clone());
        }
        response
    }

    fn soa_record(&self, zone: &Zone) -> Result<WireRecord, AuthorityError> {
        let owner = util::wire_name(&zone.name)?;
        let mname = util::wire_name(&zone.master_name_server)?;
        let rname = util::wire_name(&util::email_to_mbox(&zone.admin_email))?;

        let soa = rdata::SOA::new(
            mname,
            rname,
            1,
            util::duration_to_secs(zone.refresh) as i32,
            util::duration_to_secs(zone.retry) as i32,
            util::duration_to_secs(zone.expire) as i32,
            util::duration_to_secs(zone.min_ttl),
        );

        let mut record = WireRecord::from_rdata(
            owner,
            util::duration_to_secs(zone.soa_ttl),
            RData::SOA(soa),
        );
        record.set_dns_class(DNSClass::IN);
        Ok(record)
    }

    fn ns_records(&self, zone: &Zone) -> Result<Vec<WireRecord>, AuthorityError> {
        let owner = util::wire_name(&zone.name)?;
        let ttl = util::duration_to_secs(zone.ns_ttl);

        let mut records = Vec::with_capacity(zone.all_name_servers.len());
        for name_server in &zone.all_name_servers {
            let target = util::wire_name(name_server)?;
            let mut record =
                WireRecord::from_rdata(owner.clone(), ttl, RData::NS(rdata::NS(target)));
            record.set_dns_class(DNSClass::IN);
            records.push(record);
        }

        Ok(records)
    }

    fn attach_edns(&self, request: &Message, response: &mut Message) {
        if request.extensions().is_some() {
            let mut edns = Edns::new();
            edns.set_max_payload(self.buffer_size);
            edns.set_version(0);
            // extended response codes carry their high bits in OPT
            let high = response.response_code().high();
            if high != 0 {
                edns.set_rcode_high(high);
            }
            response.set_edns(edns);
        }
    }

    /// Encodes the reply, replacing it with a header-only truncated reply
    /// when it exceeds what the querier can take over UDP. The client is
    /// expected to retry over TCP.
    fn finalize(
        &self,
        request: &Message,
        mut response: Message,
        transport: Transport,
    ) -> Option<Vec<u8>> {
        self.attach_edns(request, &mut response);

        let wire = match response.to_vec() {
            Ok(wire) => wire,
            Err(err) => {
                error!(error = %err, "failed to encode response");
                self.events
                    .emit(ServerEvent::new(EventKind::NetworkError).with_error(err.to_string()));
                return None;
            }
        };

        if transport == Transport::Udp {
            let limit = request
                .extensions()
                .as_ref()
                .map(|edns| usize::from(edns.max_payload()))
                .unwrap_or(CLASSIC_UDP_LIMIT);

            if wire.len() > limit {
                debug!(size = wire.len(), limit, "truncating oversized UDP response");

                let mut truncated = self.reply(request);
                truncated.set_truncated(true);
                self.attach_edns(request, &mut truncated);

                return match truncated.to_vec() {
                    Ok(wire) => {
                        self.events.emit(ServerEvent::new(EventKind::Response));
                        Some(wire)
                    }
                    Err(err) => {
                        error!(error = %err, "failed to encode truncated response");
                        self.events.emit(
                            ServerEvent::new(EventKind::NetworkError)
                                .with_error(err.to_string()),
                        );
                        None
                    }
                };
            }
        }

        self.events.emit(ServerEvent::new(EventKind::Response));
        Some(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BoxError;
    use crate::record::Record;
    use async_trait::async_trait;
    use hickory_proto::op::Query;
    use hickory_proto::rr::Name;
    use std::str::FromStr;

    struct TestResolver;

    fn records(name: &str) -> Result<Vec<Set>, BoxError> {
        match name {
            "" => Ok(vec![Set::new(
                "example.com.",
                RecordType::A,
                vec![Record::addr("1.2.3.4")],
            )]),
            "ip4" => Ok(vec![Set::new(
                "ip4.example.com.",
                RecordType::A,
                vec![Record::addr("1.2.3.4")],
            )]),
            "mail" => Ok(vec![Set::new(
                "mail.example.com.",
                RecordType::MX,
                vec![Record::mx(7, "ip4.example.com.")],
            )]),
            "long" => Ok(vec![Set::new(
                "long.example.com.",
                RecordType::TXT,
                vec![
                    Record::txt(vec!["a".repeat(255), "a".repeat(255)]),
                    Record::txt(vec!["b".repeat(255), "b".repeat(255)]),
                    Record::txt(vec!["c".repeat(255), "c".repeat(255)]),
                ],
            )]),
            _ => Ok(Vec::new()),
        }
    }

    #[async_trait]
    impl ZoneResolver for TestResolver {
        async fn resolve(&self, name: &str) -> Result<Option<Zone>, BoxError> {
            if util::in_zone("example.com.", name) {
                Ok(Some(Zone::new(
                    "example.com.",
                    "ns1.example.com.",
                    vec!["ns1.example.com.".into(), "ns2.example.com.".into()],
                    Arc::new(records),
                )))
            } else {
                Ok(None)
            }
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl ZoneResolver for FailingResolver {
        async fn resolve(&self, _name: &str) -> Result<Option<Zone>, BoxError> {
            Err("resolver offline".into())
        }
    }

    fn handler() -> QueryHandler {
        QueryHandler::new(Arc::new(TestResolver), 1220, EventSink::default())
    }

    fn request(name: &str, qtype: WireType) -> Message {
        let mut query = Query::new();
        query.set_name(Name::from_str(name).unwrap());
        query.set_query_type(qtype);
        query.set_query_class(DNSClass::IN);

        let mut message = Message::new();
        message.set_id(42);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);
        message.add_query(query);
        message
    }

    #[tokio::test]
    async fn test_drops_responses() {
        let mut message = request("example.com.", WireType::A);
        message.set_message_type(MessageType::Response);
        let wire = message.to_vec().unwrap();
        assert!(handler().handle(&wire, Transport::Udp).await.is_none());
    }

    #[tokio::test]
    async fn test_drops_non_query_opcodes() {
        let mut message = request("example.com.", WireType::A);
        message.set_op_code(OpCode::Status);
        let wire = message.to_vec().unwrap();
        assert!(handler().handle(&wire, Transport::Udp).await.is_none());
    }

    #[tokio::test]
    async fn test_drops_wrong_question_count() {
        let mut message = Message::new();
        message.set_id(42);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        let wire = message.to_vec().unwrap();
        assert!(handler().handle(&wire, Transport::Udp).await.is_none());
    }

    #[tokio::test]
    async fn test_drops_garbage() {
        assert!(handler().handle(&[0xff; 7], Transport::Udp).await.is_none());
    }

    #[tokio::test]
    async fn test_drops_non_in_class() {
        let mut query = Query::new();
        query.set_name(Name::from_str("example.com.").unwrap());
        query.set_query_type(WireType::A);
        query.set_query_class(DNSClass::CH);
        let mut message = Message::new();
        message.set_id(42);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.add_query(query);
        assert!(handler().process(&message).await.is_none());
    }

    #[tokio::test]
    async fn test_any_gets_notimp() {
        let message = request("example.com.", WireType::ANY);
        let response = handler().process(&message).await.unwrap();
        assert_eq!(response.response_code(), ResponseCode::NotImp);
        assert!(!response.authoritative());
        assert!(response.answers().is_empty());
    }

    #[tokio::test]
    async fn test_unclaimed_name_gets_refused() {
        let message = request("example.org.", WireType::A);
        let response = handler().process(&message).await.unwrap();
        assert_eq!(response.response_code(), ResponseCode::Refused);
        assert!(!response.authoritative());
    }

    #[tokio::test]
    async fn test_resolver_error_gets_servfail() {
        let handler =
            QueryHandler::new(Arc::new(FailingResolver), 1220, EventSink::default());
        let message = request("example.com.", WireType::A);
        let response = handler.process(&message).await.unwrap();
        assert_eq!(response.response_code(), ResponseCode::ServFail);
    }

    #[tokio::test]
    async fn test_bad_edns_version_gets_badvers() {
        let mut message = request("example.com.", WireType::A);
        let mut edns = Edns::new();
        edns.set_version(1);
        edns.set_max_payload(1337);
        message.set_edns(edns);

        let response = handler().process(&message).await.unwrap();
        assert_eq!(response.response_code(), ResponseCode::BADVERS);
        assert!(response.answers().is_empty());
        assert!(response.name_servers().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_type_gets_nxdomain_with_soa() {
        let message = request("ip4.example.com.", WireType::SRV);
        let response = handler().process(&message).await.unwrap();
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
        assert!(response.answers().is_empty());
        assert_eq!(response.name_servers().len(), 1);
        assert_eq!(
            response.name_servers()[0].record_type(),
            WireType::SOA
        );
    }

    #[tokio::test]
    async fn test_case_is_taken_from_the_question() {
        let message = request("IP4.Example.COM.", WireType::A);
        let response = handler().process(&message).await.unwrap();
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(response.answers().len(), 1);
        assert_eq!(
            response.answers()[0].name().to_utf8(),
            "IP4.Example.COM."
        );
    }

    #[tokio::test]
    async fn test_mx_answer_carries_glue() {
        let message = request("mail.example.com.", WireType::MX);
        let response = handler().process(&message).await.unwrap();
        assert_eq!(response.answers().len(), 1);
        assert_eq!(response.additionals().len(), 1);
        assert_eq!(response.additionals()[0].record_type(), WireType::A);
        assert_eq!(
            response.additionals()[0].name().to_utf8(),
            "ip4.example.com."
        );
    }

    #[tokio::test]
    async fn test_udp_truncation_clears_sections() {
        let message = request("long.example.com.", WireType::TXT);
        let wire = message.to_vec().unwrap();

        let reply = handler().handle(&wire, Transport::Udp).await.unwrap();
        let reply = Message::from_vec(&reply).unwrap();
        assert!(reply.truncated());
        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert!(reply.answers().is_empty());
        assert!(reply.name_servers().is_empty());

        let reply = handler().handle(&wire, Transport::Tcp).await.unwrap();
        let reply = Message::from_vec(&reply).unwrap();
        assert!(!reply.truncated());
        assert_eq!(reply.answers().len(), 3);
    }

    #[tokio::test]
    async fn test_nodata_carries_soa_only() {
        let message = request("ip4.example.com.", WireType::AAAA);
        let response = handler().process(&message).await.unwrap();
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert!(response.answers().is_empty());
        assert_eq!(response.name_servers().len(), 1);
        assert_eq!(response.name_servers()[0].record_type(), WireType::SOA);
    }
}
