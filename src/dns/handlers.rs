use crate::config::SharedConfig;
use crate::error::Error;
use crate::hostname;
use crate::store::{self, DynStore};
use lazy_static::lazy_static;
use std::net::IpAddr;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{error, warn};
use trust_dns_proto::rr::rdata::SOA;
use trust_dns_server::authority::MessageResponseBuilder;
use trust_dns_server::client::op::{Header, MessageType, OpCode, ResponseCode};
use trust_dns_server::client::rr::rdata::TXT;
use trust_dns_server::client::rr::{LowerName, Name, RData, Record, RecordType};
use trust_dns_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

/// Authoritative request handler for the delegated zone.
#[derive(Clone)]
pub struct Handler {
    config: SharedConfig,
    store: DynStore,
}

lazy_static! {
    static ref SERIAL_FORMATTER: &'static [time::format_description::FormatItem<'static>] =
        format_description!(version = 2, "[year][month][day][hour]");
}

/// Current zone serial: UTC wall clock as `YYYYMMDDHH`. Strictly
/// nondecreasing across the process lifetime.
pub(crate) fn zone_serial() -> u32 {
    // NB: unwraps are safe: known date format producing values that will
    // always parse as u32.
    OffsetDateTime::now_utc()
        .format(&SERIAL_FORMATTER)
        .unwrap()
        .parse()
        .unwrap()
}

/// The sections of one authoritative answer, computed before any wire
/// encoding so the zone logic stays testable without sockets.
#[derive(Debug)]
pub(crate) struct ZoneAnswer {
    pub rcode: ResponseCode,
    pub authoritative: bool,
    pub answers: Vec<Record>,
    pub name_servers: Vec<Record>,
    pub soa: Vec<Record>,
}

impl ZoneAnswer {
    fn refused() -> Self {
        ZoneAnswer {
            rcode: ResponseCode::Refused,
            authoritative: false,
            answers: Vec::new(),
            name_servers: Vec::new(),
            soa: Vec::new(),
        }
    }
}

impl Handler {
    pub(crate) fn new(config: SharedConfig, store: DynStore) -> Self {
        Handler { config, store }
    }

    /// Compute the answer for one question against the current store state.
    pub(crate) async fn answer_query(
        &self,
        qname: &LowerName,
        qtype: RecordType,
    ) -> Result<ZoneAnswer, Error> {
        let apex = self.config.apex();
        if !apex.zone_of(qname) {
            return Ok(ZoneAnswer::refused());
        }

        let key = hostname::normalize(&qname.to_string());
        let owner: Name = qname.into();
        let ttl = self.config.dns.record_ttl;

        let answers = match qtype {
            RecordType::A => {
                let addrs =
                    store::with_deadline(store::DNS_DEADLINE, self.store.get_ips(&key)).await?;
                a_records(&owner, ttl, &addrs)
            }
            RecordType::AAAA => {
                let addrs =
                    store::with_deadline(store::DNS_DEADLINE, self.store.get_ips(&key)).await?;
                aaaa_records(&owner, ttl, &addrs)
            }
            RecordType::TXT => {
                let values =
                    store::with_deadline(store::DNS_DEADLINE, self.store.get_txt(&key)).await?;
                txt_records(&owner, ttl, &values)
            }
            RecordType::SOA if qname == apex => vec![self.soa_record()?],
            RecordType::NS if qname == apex => self.ns_records(),
            _ => Vec::new(),
        };

        if answers.is_empty() {
            let exists =
                store::with_deadline(store::DNS_DEADLINE, self.store.domain_exists(&key)).await?;
            let rcode = if exists {
                ResponseCode::NoError
            } else {
                ResponseCode::NXDomain
            };
            return Ok(ZoneAnswer {
                rcode,
                authoritative: true,
                answers: Vec::new(),
                name_servers: Vec::new(),
                soa: vec![self.soa_record()?],
            });
        }

        Ok(ZoneAnswer {
            rcode: ResponseCode::NoError,
            authoritative: true,
            answers,
            name_servers: self.ns_records(),
            soa: Vec::new(),
        })
    }

    fn soa_record(&self) -> Result<Record, Error> {
        let ns_admin = self.config.ns_admin()?;
        // See RIPE 203[0] for recommended timer values.
        // [0]: https://www.ripe.net/publications/docs/ripe-203
        let soa_rdata = RData::SOA(SOA::new(
            self.config.primary_ns().into(),
            ns_admin,
            zone_serial(),
            28_800,  // refresh: 8 hrs.
            7_200,   // retry: 2 hrs.
            604_800, // expire: 7 days.
            86_400,  // minimum: 1 day.
        ));
        Ok(Record::from_rdata(
            self.config.apex().into(),
            self.config.dns.record_ttl,
            soa_rdata,
        ))
    }

    fn ns_records(&self) -> Vec<Record> {
        let apex: Name = self.config.apex().into();
        self.config
            .dns
            .nameservers
            .iter()
            .map(|ns| {
                Record::from_rdata(
                    apex.clone(),
                    self.config.dns.record_ttl,
                    RData::NS(ns.into()),
                )
            })
            .collect()
    }

    async fn dispatch_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        if request.op_code() != OpCode::Query || request.message_type() != MessageType::Query {
            return self.send_refused(request, response_handle).await;
        }

        let qname = request.query().name().clone();
        let qtype = request.query().query_type();
        match self.answer_query(&qname, qtype).await {
            Ok(answer) => self.send_answer(request, response_handle, answer).await,
            Err(err) => {
                // Store failure or deadline: answer SERVFAIL with AA clear
                // rather than dropping the query on the floor.
                warn!(%qname, %qtype, error = %err, "query failed, answering SERVFAIL");
                self.send_servfail(request, response_handle).await
            }
        }
    }

    async fn send_answer<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        answer: ZoneAnswer,
    ) -> Result<ResponseInfo, Error> {
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(answer.authoritative);
        header.set_response_code(answer.rcode);
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(
            header,
            answer.answers.iter(),
            answer.name_servers.iter(),
            answer.soa.iter(),
            &[],
        );
        Ok(response_handle.send_response(response).await?)
    }

    async fn send_refused<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        let builder = MessageResponseBuilder::from_message_request(request);
        Ok(response_handle
            .send_response(builder.error_msg(request.header(), ResponseCode::Refused))
            .await?)
    }

    async fn send_servfail<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> Result<ResponseInfo, Error> {
        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(false);
        header.set_response_code(ResponseCode::ServFail);
        let response = builder.build_no_records(header);
        Ok(response_handle.send_response(response).await?)
    }
}

fn a_records(owner: &Name, ttl: u32, addrs: &[IpAddr]) -> Vec<Record> {
    addrs
        .iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(ipv4_addr) => Some(RData::A(*ipv4_addr)),
            IpAddr::V6(_) => None,
        })
        .map(|rdata| Record::from_rdata(owner.clone(), ttl, rdata))
        .collect()
}

fn aaaa_records(owner: &Name, ttl: u32, addrs: &[IpAddr]) -> Vec<Record> {
    addrs
        .iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(_) => None,
            IpAddr::V6(ipv6_addr) => Some(RData::AAAA(*ipv6_addr)),
        })
        .map(|rdata| Record::from_rdata(owner.clone(), ttl, rdata))
        .collect()
}

fn txt_records(owner: &Name, ttl: u32, values: &[String]) -> Vec<Record> {
    values
        .iter()
        .map(|value| {
            Record::from_rdata(
                owner.clone(),
                ttl,
                RData::TXT(TXT::new(vec![value.clone()])),
            )
        })
        .collect()
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        match self.dispatch_request(request, response_handle).await {
            Ok(info) => info,
            Err(err) => {
                error!("error in RequestHandler: {err:?}");
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::{MemoryStore, Store};
    use std::collections::HashSet;
    use std::str::FromStr;
    use std::sync::Arc;

    const CONF: &str = r#"
        [auth]
        username = "updater"
        password = "hunter2"

        [dns]
        domain = "dyn.example.org"
        nsadmin = "hostmaster@example.org"
        nameservers = ["ns1.example.org", "ns2.example.org"]

        [db]
        directory = "/tmp/unused"

        [contact]
        email = "ops@example.org"
    "#;

    fn handler() -> (Handler, Arc<MemoryStore>) {
        let config = Arc::new(Config::try_from_toml(CONF).unwrap());
        let store = Arc::new(MemoryStore::new());
        (Handler::new(config, store.clone()), store)
    }

    fn qname(name: &str) -> LowerName {
        LowerName::from(Name::from_str(name).unwrap())
    }

    fn answer_ips(answer: &ZoneAnswer) -> HashSet<IpAddr> {
        answer
            .answers
            .iter()
            .filter_map(|r| match r.data() {
                Some(RData::A(ip)) => Some(IpAddr::V4(*ip)),
                Some(RData::AAAA(ip)) => Some(IpAddr::V6(*ip)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn a_query_answers_v4_only() {
        let (handler, store) = handler();
        store
            .put_ips(
                "host.dyn.example.org",
                vec!["203.0.113.7".parse().unwrap(), "2001:db8::1".parse().unwrap()],
            )
            .await
            .unwrap();

        let answer = handler
            .answer_query(&qname("host.dyn.example.org."), RecordType::A)
            .await
            .unwrap();
        assert_eq!(answer.rcode, ResponseCode::NoError);
        assert!(answer.authoritative);
        assert_eq!(answer.answers.len(), 1);
        assert_eq!(answer.answers[0].ttl(), 300);
        assert_eq!(
            answer_ips(&answer),
            HashSet::from(["203.0.113.7".parse().unwrap()])
        );
        // Positive answers carry the NS set in the authority section.
        assert_eq!(answer.name_servers.len(), 2);
        assert!(answer.soa.is_empty());
    }

    #[tokio::test]
    async fn a_and_aaaa_partition_the_stored_set() {
        let (handler, store) = handler();
        let stored: Vec<IpAddr> = vec![
            "203.0.113.7".parse().unwrap(),
            "198.51.100.4".parse().unwrap(),
            "2001:db8::1".parse().unwrap(),
        ];
        store.put_ips("host.dyn.example.org", stored.clone()).await.unwrap();

        let name = qname("host.dyn.example.org.");
        let v4 = handler.answer_query(&name, RecordType::A).await.unwrap();
        let v6 = handler.answer_query(&name, RecordType::AAAA).await.unwrap();

        let v4_set = answer_ips(&v4);
        let v6_set = answer_ips(&v6);
        assert!(v4_set.is_disjoint(&v6_set));
        let union: HashSet<IpAddr> = v4_set.union(&v6_set).copied().collect();
        assert_eq!(union, stored.into_iter().collect());
    }

    #[tokio::test]
    async fn txt_query_serves_challenge_value() {
        let (handler, store) = handler();
        store
            .put_txt(
                "_acme-challenge.host.dyn.example.org",
                vec!["abc123".to_string()],
            )
            .await
            .unwrap();

        let answer = handler
            .answer_query(
                &qname("_acme-challenge.host.dyn.example.org."),
                RecordType::TXT,
            )
            .await
            .unwrap();
        assert_eq!(answer.rcode, ResponseCode::NoError);
        assert_eq!(answer.answers.len(), 1);
        match answer.answers[0].data() {
            Some(RData::TXT(txt)) => {
                assert_eq!(txt.txt_data()[0].as_ref(), b"abc123");
            }
            other => panic!("expected TXT rdata, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn absent_name_is_nxdomain_with_soa_authority() {
        let (handler, _store) = handler();
        let answer = handler
            .answer_query(&qname("absent.dyn.example.org."), RecordType::A)
            .await
            .unwrap();
        assert_eq!(answer.rcode, ResponseCode::NXDomain);
        assert!(answer.authoritative);
        assert!(answer.answers.is_empty());
        assert_eq!(answer.soa.len(), 1);
        assert!(matches!(answer.soa[0].data(), Some(RData::SOA(_))));
    }

    #[tokio::test]
    async fn existing_name_without_qtype_is_nodata() {
        let (handler, store) = handler();
        store
            .put_txt("host.dyn.example.org", vec!["hello".to_string()])
            .await
            .unwrap();

        let answer = handler
            .answer_query(&qname("host.dyn.example.org."), RecordType::A)
            .await
            .unwrap();
        assert_eq!(answer.rcode, ResponseCode::NoError);
        assert!(answer.answers.is_empty());
        assert_eq!(answer.soa.len(), 1);
    }

    #[tokio::test]
    async fn update_is_visible_to_next_query() {
        let (handler, store) = handler();
        store
            .put_ips("host.dyn.example.org", vec!["198.51.100.4".parse().unwrap()])
            .await
            .unwrap();

        let answer = handler
            .answer_query(&qname("host.dyn.example.org."), RecordType::A)
            .await
            .unwrap();
        assert_eq!(
            answer_ips(&answer),
            HashSet::from(["198.51.100.4".parse().unwrap()])
        );
    }

    #[tokio::test]
    async fn soa_query_at_apex() {
        let (handler, _store) = handler();
        let answer = handler
            .answer_query(&qname("dyn.example.org."), RecordType::SOA)
            .await
            .unwrap();
        assert_eq!(answer.answers.len(), 1);
        match answer.answers[0].data() {
            Some(RData::SOA(soa)) => {
                assert_eq!(soa.mname().to_utf8(), "ns1.example.org");
                assert_eq!(soa.refresh(), 28_800);
                assert_eq!(soa.minimum(), 86_400);
            }
            other => panic!("expected SOA rdata, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ns_query_at_apex() {
        let (handler, _store) = handler();
        let answer = handler
            .answer_query(&qname("dyn.example.org."), RecordType::NS)
            .await
            .unwrap();
        assert_eq!(answer.answers.len(), 2);
    }

    #[tokio::test]
    async fn out_of_zone_is_refused() {
        let (handler, _store) = handler();
        let answer = handler
            .answer_query(&qname("other.example.com."), RecordType::A)
            .await
            .unwrap();
        assert_eq!(answer.rcode, ResponseCode::Refused);
        assert!(!answer.authoritative);
    }

    #[test]
    fn serial_is_nondecreasing() {
        let first = zone_serial();
        let second = zone_serial();
        assert!(second >= first);
        // Sanity: the serial looks like YYYYMMDDHH.
        assert!(first > 2_000_00_00_00);
    }
}
