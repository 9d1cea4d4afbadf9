//! GFW-style DNS poisoning.

use std::sync::Arc;

use bytes::Bytes;
use hickory_proto::op::{Message, MessageType, OpCode};

use crate::dns::Database;
use crate::packet::{Filter, IpProtocol, Packet, Target, TcpFlags, DEFAULT_TTL};

/// Injects spoofed replies for DNS-over-UDP queries matching its database.
///
/// The original query is accepted and races through the network, modeling
/// real poisoning where the legitimate answer arrives after the spoofed
/// one.
pub struct DnsPoisoner {
    db: Arc<Database>,
}

impl DnsPoisoner {
    /// Creates a poisoner answering from the given record database.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn spoof(&self, pkt: &Packet, query: &Message) -> Vec<Packet> {
        let question = &query.queries()[0];
        let Some(answers) = self.db.lookup(question.query_type(), question.name()) else {
            return Vec::new();
        };

        let mut response = Message::new();
        response
            .set_id(query.id())
            .set_message_type(MessageType::Response)
            .set_op_code(query.op_code())
            .set_recursion_desired(query.recursion_desired())
            .set_recursion_available(true)
            .add_query(question.clone())
            .add_answers(answers);
        let Ok(payload) = response.to_vec() else {
            return Vec::new();
        };

        vec![Packet {
            src_addr: pkt.dst_addr,
            dst_addr: pkt.src_addr,
            protocol: IpProtocol::Udp,
            src_port: pkt.dst_port,
            dst_port: pkt.src_port,
            flags: TcpFlags::empty(),
            ttl: DEFAULT_TTL,
            payload: Bytes::from(payload),
        }]
    }
}

impl Filter for DnsPoisoner {
    fn filter(&self, pkt: &Packet) -> (Target, Vec<Packet>) {
        // Only UDP DNS queries are of interest.
        if pkt.protocol != IpProtocol::Udp || pkt.dst_port != 53 {
            return (Target::Accept, Vec::new());
        }
        let Ok(query) = Message::from_vec(&pkt.payload) else {
            return (Target::Accept, Vec::new());
        };
        if query.message_type() != MessageType::Query
            || query.op_code() != OpCode::Query
            || query.queries().len() != 1
        {
            return (Target::Accept, Vec::new());
        }

        // Let the original query continue alongside the spoofed reply.
        (Target::Accept, self.spoof(pkt, &query))
    }
}
