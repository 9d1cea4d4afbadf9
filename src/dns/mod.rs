//! The simulated global DNS database.
//!
//! [`Database`] stores A/AAAA/CNAME records and answers wire-format
//! queries through the [`Handler`] trait. The same database backs the
//! scenario's DNS servers (all transports) and the DNS poisoner's spoofed
//! answers.

pub mod server;

use std::collections::HashMap;
use std::net::IpAddr;

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA, CNAME};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use parking_lot::RwLock;

/// Default TTL for simulated records.
const RECORD_TTL: u32 = 3600;

/// Maximum CNAME indirections followed by a lookup.
const MAX_CNAME_DEPTH: usize = 10;

/// Serves raw DNS queries.
///
/// Implementations return the wire-format response, or `None` when the
/// query is malformed and deserves no answer at all.
pub trait Handler: Send + Sync {
    /// Handles a single wire-format query.
    fn handle(&self, raw_query: &[u8]) -> Option<Vec<u8>>;
}

/// The global DNS database.
pub struct Database {
    names: RwLock<HashMap<String, Vec<Record>>>,
}

impl Database {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self {
            names: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a CNAME record aliasing `name` to `alias`.
    pub fn add_cname(&self, name: &str, alias: &str) {
        let Some(owner) = parse_name(name) else {
            return;
        };
        let Some(target) = parse_name(alias) else {
            return;
        };
        let record = Record::from_rdata(owner.clone(), RECORD_TTL, RData::CNAME(CNAME(target)));
        self.names
            .write()
            .entry(canonical_key(&owner))
            .or_default()
            .push(record);
    }

    /// Adds A/AAAA records mapping each domain name to each address.
    pub fn add_addresses<S: AsRef<str>>(&self, domain_names: &[S], addresses: &[IpAddr]) {
        let mut names = self.names.write();
        for name in domain_names {
            let Some(owner) = parse_name(name.as_ref()) else {
                continue;
            };
            for addr in addresses {
                let rdata = match addr {
                    IpAddr::V4(v4) => RData::A(A(*v4)),
                    IpAddr::V6(v6) => RData::AAAA(AAAA(*v6)),
                };
                let record = Record::from_rdata(owner.clone(), RECORD_TTL, rdata);
                names.entry(canonical_key(&owner)).or_default().push(record);
            }
        }
    }

    /// Returns the records answering a query for `(qtype, name)`.
    ///
    /// CNAME indirections are followed up to a fixed depth; the returned
    /// answer accumulates the traversed chain plus the terminal records.
    #[must_use]
    pub fn lookup(&self, qtype: RecordType, name: &Name) -> Option<Vec<Record>> {
        let names = self.names.read();
        let mut key = canonical_key(name);
        let mut answers = Vec::new();

        for _ in 0..MAX_CNAME_DEPTH {
            let found = names.get(&key)?;
            answers.extend(found.iter().cloned());

            if found.iter().any(|rr| rr.record_type() == qtype) {
                return Some(answers);
            }

            // Otherwise follow the first CNAME redirect, if any.
            let cname = found.iter().find_map(|rr| match rr.data() {
                Some(RData::CNAME(cname)) => Some(cname.0.clone()),
                _ => None,
            })?;
            key = canonical_key(&cname);
        }

        None
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for Database {
    fn handle(&self, raw_query: &[u8]) -> Option<Vec<u8>> {
        let query = Message::from_vec(raw_query).ok()?;
        if query.message_type() != MessageType::Query
            || query.op_code() != OpCode::Query
            || query.queries().len() != 1
        {
            return None;
        }
        let question = &query.queries()[0];

        let mut response = Message::new();
        response
            .set_id(query.id())
            .set_message_type(MessageType::Response)
            .set_op_code(query.op_code())
            .set_recursion_desired(query.recursion_desired())
            .set_recursion_available(true)
            .add_query(question.clone());

        if question.query_class() != DNSClass::IN {
            response.set_response_code(ResponseCode::Refused);
        } else if matches!(
            question.query_type(),
            RecordType::A | RecordType::AAAA | RecordType::CNAME
        ) {
            match self.lookup(question.query_type(), question.name()) {
                Some(answers) => {
                    response.add_answers(answers);
                }
                None => {
                    response.set_response_code(ResponseCode::NXDomain);
                }
            }
        } else {
            response.set_response_code(ResponseCode::NXDomain);
        }

        response.to_vec().ok()
    }
}

/// Parses a domain name, forcing it fully qualified.
fn parse_name(name: &str) -> Option<Name> {
    let mut name = Name::from_utf8(name).ok()?;
    name.set_fqdn(true);
    Some(name)
}

/// The lookup key for a name: lowercase, fully qualified.
fn canonical_key(name: &Name) -> String {
    let mut name = name.clone();
    name.set_fqdn(true);
    name.to_ascii().to_lowercase()
}
