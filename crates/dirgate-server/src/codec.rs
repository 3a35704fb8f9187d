//! LDAP message framing
//!
//! The protocol crate refuses to decode binds whose credential is anything
//! other than a simple password. Those frames are recognized here and handed
//! on as SASL bind requests so they can be answered with `invalidCredentials`
//! instead of ending the connection.

use bytes::{Buf, BytesMut};
use lber::common::TagClass;
use lber::structure::{StructureTag, PL};
use ldap3_proto::proto::{LdapBindCred, LdapBindRequest, LdapMsg, LdapOp, SaslCredentials};
use ldap3_proto::{LdapCodec, DEFAULT_MAX_BER_SIZE};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

const SEQUENCE: u64 = 16;
const INTEGER: u64 = 2;
const OCTET_STRING: u64 = 4;
const BIND_REQUEST: u64 = 0;
const SIMPLE_AUTH: u64 = 0;

/// Codec for one gateway connection
#[derive(Default)]
pub struct GatewayCodec {
    inner: LdapCodec,
}

impl Decoder for GatewayCodec {
    type Item = LdapMsg;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<LdapMsg>, io::Error> {
        let peeked = match lber::Parser::new().parse(buf) {
            Ok((rest, tag)) => Some((buf.len() - rest.len(), non_simple_bind(&tag))),
            Err(lber::Err::Incomplete(_)) => return Ok(None),
            Err(_) => None,
        };

        match peeked {
            Some((size, Some(msg))) if size <= DEFAULT_MAX_BER_SIZE => {
                buf.advance(size);
                Ok(Some(msg))
            }
            // Everything else, errors included, is the protocol codec's call
            _ => self.inner.decode(buf),
        }
    }
}

impl Encoder<LdapMsg> for GatewayCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: LdapMsg, buf: &mut BytesMut) -> Result<(), io::Error> {
        self.inner.encode(msg, buf)
    }
}

/// A bind request carrying any credential choice other than `simple [0]`
fn non_simple_bind(tag: &StructureTag) -> Option<LdapMsg> {
    let envelope = constructed(tag, TagClass::Universal, SEQUENCE)?;
    let (msgid, op) = match envelope {
        [id, op, ..] => (message_id(id)?, op),
        _ => return None,
    };

    let (name, cred) = match constructed(op, TagClass::Application, BIND_REQUEST)? {
        [_version, name, cred] => (name, cred),
        _ => return None,
    };
    if cred.class != TagClass::Context || cred.id == SIMPLE_AUTH {
        return None;
    }

    let dn = String::from_utf8(primitive(name, TagClass::Universal, OCTET_STRING)?.to_vec()).ok()?;

    // SaslCredentials ::= SEQUENCE { mechanism LDAPString, credentials OCTET STRING OPTIONAL }
    let mechanism = match &cred.payload {
        PL::C(fields) => fields
            .first()
            .and_then(|field| primitive(field, TagClass::Universal, OCTET_STRING))
            .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
            .unwrap_or_default(),
        PL::P(_) => format!("[{}]", cred.id),
    };

    Some(LdapMsg {
        msgid,
        op: LdapOp::BindRequest(LdapBindRequest {
            dn,
            cred: LdapBindCred::SASL(SaslCredentials {
                mechanism,
                credentials: Vec::new(),
            }),
        }),
        ctrl: vec![],
    })
}

fn constructed(tag: &StructureTag, class: TagClass, id: u64) -> Option<&[StructureTag]> {
    match &tag.payload {
        PL::C(children) if tag.class == class && tag.id == id => Some(children),
        _ => None,
    }
}

fn primitive(tag: &StructureTag, class: TagClass, id: u64) -> Option<&[u8]> {
    match &tag.payload {
        PL::P(bytes) if tag.class == class && tag.id == id => Some(bytes),
        _ => None,
    }
}

/// MessageID ::= INTEGER (0 .. 2^31 - 1)
fn message_id(tag: &StructureTag) -> Option<i32> {
    let bytes = primitive(tag, TagClass::Universal, INTEGER)?;
    if bytes.is_empty() || bytes.len() > 4 || bytes[0] & 0x80 != 0 {
        return None;
    }

    Some(bytes.iter().fold(0i32, |id, &byte| (id << 8) | i32::from(byte)))
}
