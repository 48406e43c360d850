//! TLV wire codecs for the routing control plane.
//!
//! Encoding is the named-data TLV format: type and length are variable-size
//! numbers (one byte below 253, then 253+u16 / 254+u32 / 255+u64, big
//! endian), values are nested TLVs or minimal-length big-endian naturals.
//!
//! Type numbers are part of the inter-router protocol and must not change:
//!
//! | Structure | Type |
//! |-----------|------|
//! | Advertisement | 0xC9 (entries 0xCA: dest 0xCC, next hop 0xCE, cost 0xD0, other cost 0xD2) |
//! | PrefixOpList | 0x12D (reset 0x12E, add 0x130, remove 0x132) |
//! | Status | 0x191 family |
//! | ControlArgs / ControlResponse | 0x68 / 0x65 (forwarder management) |
//!
//! Decoders are strict on structure and lenient on unknown fields, which are
//! skipped. Malformed input yields [`TlvError`]; callers log and drop the
//! message without touching table state.

use crate::name::Name;

// Outer packet types.
pub const TYP_ADVERTISEMENT: u64 = 0xC9;
pub const TYP_ADV_ENTRY: u64 = 0xCA;
pub const TYP_DESTINATION: u64 = 0xCC;
pub const TYP_NEXT_HOP: u64 = 0xCE;
pub const TYP_COST: u64 = 0xD0;
pub const TYP_OTHER_COST: u64 = 0xD2;

pub const TYP_PREFIX_OP_LIST: u64 = 0x12D;
pub const TYP_PREFIX_OP_RESET: u64 = 0x12E;
pub const TYP_PREFIX_OP_ADD: u64 = 0x130;
pub const TYP_PREFIX_OP_REMOVE: u64 = 0x132;

pub const TYP_STATUS_VERSION: u64 = 0x191;
pub const TYP_STATUS_NETWORK: u64 = 0x193;
pub const TYP_STATUS_ROUTER: u64 = 0x195;
pub const TYP_STATUS_N_RIB: u64 = 0x197;
pub const TYP_STATUS_N_NEIGHBORS: u64 = 0x199;
pub const TYP_STATUS_N_FIB: u64 = 0x19B;

// Forwarder management structures.
pub const TYP_CONTROL_RESPONSE: u64 = 0x65;
pub const TYP_STATUS_CODE: u64 = 0x66;
pub const TYP_STATUS_TEXT: u64 = 0x67;
pub const TYP_CONTROL_ARGS: u64 = 0x68;
pub const TYP_FACE_ID: u64 = 0x69;
pub const TYP_ARG_COST: u64 = 0x6A;
pub const TYP_STRATEGY: u64 = 0x6B;
pub const TYP_FLAGS: u64 = 0x6C;
pub const TYP_ORIGIN: u64 = 0x6F;
pub const TYP_MASK: u64 = 0x70;
pub const TYP_URI: u64 = 0x72;
pub const TYP_FACE_PERSISTENCY: u64 = 0x85;
pub const TYP_MTU: u64 = 0x89;

const TYP_NAME: u64 = 0x07;

/// Errors from TLV decoding.
#[derive(Debug, thiserror::Error)]
pub enum TlvError {
    #[error("buffer truncated")]
    Truncated,

    #[error("length {0} exceeds remaining buffer")]
    BadLength(u64),

    #[error("expected type {expected:#x}, found {found:#x}")]
    UnexpectedType { expected: u64, found: u64 },

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

// ── variable-size numbers and naturals ───────────────────────────────

/// Write a TLV variable-size number (used for both type and length).
pub fn write_varnum(buf: &mut Vec<u8>, n: u64) {
    if n < 253 {
        buf.push(n as u8);
    } else if n <= u16::MAX as u64 {
        buf.push(253);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= u32::MAX as u64 {
        buf.push(254);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(255);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Minimal-length big-endian encoding of a nonnegative integer value.
pub fn natural_bytes(n: u64) -> Vec<u8> {
    if n <= u8::MAX as u64 {
        vec![n as u8]
    } else if n <= u16::MAX as u64 {
        (n as u16).to_be_bytes().to_vec()
    } else if n <= u32::MAX as u64 {
        (n as u32).to_be_bytes().to_vec()
    } else {
        n.to_be_bytes().to_vec()
    }
}

/// Decode a big-endian natural of 1..=8 bytes.
pub fn natural_from_bytes(b: &[u8]) -> Option<u64> {
    if b.is_empty() || b.len() > 8 {
        return None;
    }
    let mut n = 0u64;
    for &byte in b {
        n = (n << 8) | byte as u64;
    }
    Some(n)
}

/// Write one TLV (type, length, value) into `buf`.
pub fn write_tlv(buf: &mut Vec<u8>, typ: u64, value: &[u8]) {
    write_varnum(buf, typ);
    write_varnum(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

fn write_natural_tlv(buf: &mut Vec<u8>, typ: u64, n: u64) {
    let v = natural_bytes(n);
    write_tlv(buf, typ, &v);
}

/// Sequential reader over a TLV buffer.
pub struct TlvReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TlvReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        TlvReader { buf, pos: 0 }
    }

    pub fn done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_varnum(&mut self) -> Result<u64, TlvError> {
        let first = *self.buf.get(self.pos).ok_or(TlvError::Truncated)?;
        self.pos += 1;
        let width = match first {
            253 => 2,
            254 => 4,
            255 => 8,
            b => return Ok(b as u64),
        };
        let end = self.pos + width;
        let bytes = self.buf.get(self.pos..end).ok_or(TlvError::Truncated)?;
        self.pos = end;
        let mut n = 0u64;
        for &b in bytes {
            n = (n << 8) | b as u64;
        }
        Ok(n)
    }

    /// Read the next (type, value) pair.
    pub fn read_tlv(&mut self) -> Result<(u64, &'a [u8]), TlvError> {
        let typ = self.read_varnum()?;
        let len = self.read_varnum()?;
        let end = self
            .pos
            .checked_add(len as usize)
            .ok_or(TlvError::BadLength(len))?;
        let value = self.buf.get(self.pos..end).ok_or(TlvError::BadLength(len))?;
        self.pos = end;
        Ok((typ, value))
    }
}

// ── shared helpers ───────────────────────────────────────────────────

/// Encode a name wrapped in an outer struct type, e.g. Destination (0xCC).
fn write_wrapped_name(buf: &mut Vec<u8>, typ: u64, name: &Name) {
    let mut inner = Vec::with_capacity(32);
    name.encode_into(&mut inner);
    write_tlv(buf, typ, &inner);
}

/// Decode the payload of a struct that wraps a single name.
fn read_wrapped_name(value: &[u8]) -> Result<Name, TlvError> {
    let mut r = TlvReader::new(value);
    while !r.done() {
        let (typ, val) = r.read_tlv()?;
        if typ == TYP_NAME {
            return Name::decode_value(val);
        }
    }
    Err(TlvError::MissingField("name"))
}

fn require_natural(value: &[u8], field: &'static str) -> Result<u64, TlvError> {
    natural_from_bytes(value).ok_or(TlvError::MissingField(field))
}

// ── Advertisement ────────────────────────────────────────────────────

/// One reachability tuple in an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvEntry {
    pub destination: Name,
    pub next_hop: Name,
    pub cost: u64,
    pub other_cost: u64,
}

/// A router's full reachability advertisement (0xC9).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    pub entries: Vec<AdvEntry>,
}

impl Advertisement {
    pub fn encode(&self) -> Vec<u8> {
        let mut inner = Vec::with_capacity(64 * self.entries.len());
        for e in &self.entries {
            let mut ev = Vec::with_capacity(64);
            write_wrapped_name(&mut ev, TYP_DESTINATION, &e.destination);
            write_wrapped_name(&mut ev, TYP_NEXT_HOP, &e.next_hop);
            write_natural_tlv(&mut ev, TYP_COST, e.cost);
            write_natural_tlv(&mut ev, TYP_OTHER_COST, e.other_cost);
            write_tlv(&mut inner, TYP_ADV_ENTRY, &ev);
        }
        let mut buf = Vec::with_capacity(inner.len() + 8);
        write_tlv(&mut buf, TYP_ADVERTISEMENT, &inner);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut outer = TlvReader::new(buf);
        let (typ, value) = outer.read_tlv()?;
        if typ != TYP_ADVERTISEMENT {
            return Err(TlvError::UnexpectedType { expected: TYP_ADVERTISEMENT, found: typ });
        }

        let mut entries = Vec::new();
        let mut r = TlvReader::new(value);
        while !r.done() {
            let (typ, ev) = r.read_tlv()?;
            if typ != TYP_ADV_ENTRY {
                continue;
            }

            let mut destination = None;
            let mut next_hop = None;
            let mut cost = None;
            let mut other_cost = None;

            let mut er = TlvReader::new(ev);
            while !er.done() {
                let (ft, fv) = er.read_tlv()?;
                match ft {
                    TYP_DESTINATION => destination = Some(read_wrapped_name(fv)?),
                    TYP_NEXT_HOP => next_hop = Some(read_wrapped_name(fv)?),
                    TYP_COST => cost = Some(require_natural(fv, "cost")?),
                    TYP_OTHER_COST => other_cost = Some(require_natural(fv, "other_cost")?),
                    _ => {}
                }
            }

            entries.push(AdvEntry {
                destination: destination.ok_or(TlvError::MissingField("destination"))?,
                next_hop: next_hop.ok_or(TlvError::MissingField("next_hop"))?,
                cost: cost.ok_or(TlvError::MissingField("cost"))?,
                other_cost: other_cost.ok_or(TlvError::MissingField("other_cost"))?,
            });
        }

        Ok(Advertisement { entries })
    }
}

// ── PrefixOpList ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixOpAdd {
    pub name: Name,
    pub cost: u64,
}

/// Incremental (or snapshot, with `reset`) prefix table operation (0x12D).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixOpList {
    pub exit_router: Name,
    pub reset: bool,
    pub adds: Vec<PrefixOpAdd>,
    pub removes: Vec<Name>,
}

impl PrefixOpList {
    pub fn encode(&self) -> Vec<u8> {
        let mut inner = Vec::with_capacity(64);
        write_wrapped_name(&mut inner, TYP_DESTINATION, &self.exit_router);
        if self.reset {
            write_tlv(&mut inner, TYP_PREFIX_OP_RESET, &[]);
        }
        for add in &self.adds {
            let mut av = Vec::with_capacity(40);
            add.name.encode_into(&mut av);
            write_natural_tlv(&mut av, TYP_COST, add.cost);
            write_tlv(&mut inner, TYP_PREFIX_OP_ADD, &av);
        }
        for remove in &self.removes {
            let mut rv = Vec::with_capacity(32);
            remove.encode_into(&mut rv);
            write_tlv(&mut inner, TYP_PREFIX_OP_REMOVE, &rv);
        }
        let mut buf = Vec::with_capacity(inner.len() + 8);
        write_tlv(&mut buf, TYP_PREFIX_OP_LIST, &inner);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut outer = TlvReader::new(buf);
        let (typ, value) = outer.read_tlv()?;
        if typ != TYP_PREFIX_OP_LIST {
            return Err(TlvError::UnexpectedType { expected: TYP_PREFIX_OP_LIST, found: typ });
        }

        let mut ops = PrefixOpList::default();
        let mut have_router = false;

        let mut r = TlvReader::new(value);
        while !r.done() {
            let (ft, fv) = r.read_tlv()?;
            match ft {
                TYP_DESTINATION => {
                    ops.exit_router = read_wrapped_name(fv)?;
                    have_router = true;
                }
                TYP_PREFIX_OP_RESET => ops.reset = true,
                TYP_PREFIX_OP_ADD => {
                    let mut name = None;
                    let mut cost = None;
                    let mut ar = TlvReader::new(fv);
                    while !ar.done() {
                        let (at, av) = ar.read_tlv()?;
                        match at {
                            TYP_NAME => name = Some(Name::decode_value(av)?),
                            TYP_COST => cost = Some(require_natural(av, "cost")?),
                            _ => {}
                        }
                    }
                    ops.adds.push(PrefixOpAdd {
                        name: name.ok_or(TlvError::MissingField("name"))?,
                        cost: cost.ok_or(TlvError::MissingField("cost"))?,
                    });
                }
                TYP_PREFIX_OP_REMOVE => {
                    let mut rr = TlvReader::new(fv);
                    let mut name = None;
                    while !rr.done() {
                        let (rt, rv) = rr.read_tlv()?;
                        if rt == TYP_NAME {
                            name = Some(Name::decode_value(rv)?);
                        }
                    }
                    ops.removes.push(name.ok_or(TlvError::MissingField("name"))?);
                }
                _ => {}
            }
        }

        // A zero-component exit router would key a table entry on the
        // empty name; treat it as missing.
        if !have_router || ops.exit_router.is_empty() {
            return Err(TlvError::MissingField("exit_router"));
        }
        Ok(ops)
    }
}

// ── Status ───────────────────────────────────────────────────────────

/// Router status report served on the management surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub version: String,
    pub network_name: Name,
    pub router_name: Name,
    pub n_rib_entries: u64,
    pub n_neighbors: u64,
    pub n_fib_entries: u64,
}

impl Status {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96);
        write_tlv(&mut buf, TYP_STATUS_VERSION, self.version.as_bytes());
        write_wrapped_name(&mut buf, TYP_STATUS_NETWORK, &self.network_name);
        write_wrapped_name(&mut buf, TYP_STATUS_ROUTER, &self.router_name);
        write_natural_tlv(&mut buf, TYP_STATUS_N_RIB, self.n_rib_entries);
        write_natural_tlv(&mut buf, TYP_STATUS_N_NEIGHBORS, self.n_neighbors);
        write_natural_tlv(&mut buf, TYP_STATUS_N_FIB, self.n_fib_entries);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut status = Status::default();
        let mut r = TlvReader::new(buf);
        while !r.done() {
            let (ft, fv) = r.read_tlv()?;
            match ft {
                TYP_STATUS_VERSION => {
                    status.version = String::from_utf8_lossy(fv).into_owned();
                }
                TYP_STATUS_NETWORK => status.network_name = read_wrapped_name(fv)?,
                TYP_STATUS_ROUTER => status.router_name = read_wrapped_name(fv)?,
                TYP_STATUS_N_RIB => status.n_rib_entries = require_natural(fv, "n_rib")?,
                TYP_STATUS_N_NEIGHBORS => status.n_neighbors = require_natural(fv, "n_neighbors")?,
                TYP_STATUS_N_FIB => status.n_fib_entries = require_natural(fv, "n_fib")?,
                _ => {}
            }
        }
        Ok(status)
    }
}

// ── forwarder management ─────────────────────────────────────────────

/// Arguments to a forwarder control command (0x68). All fields optional;
/// each command uses the subset it needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlArgs {
    pub name: Option<Name>,
    pub face_id: Option<u64>,
    pub cost: Option<u64>,
    pub origin: Option<u64>,
    pub strategy: Option<Name>,
    pub flags: Option<u64>,
    pub mask: Option<u64>,
    pub uri: Option<String>,
    pub face_persistency: Option<u64>,
    pub mtu: Option<u64>,
}

impl ControlArgs {
    pub fn encode(&self) -> Vec<u8> {
        let mut inner = Vec::with_capacity(64);
        if let Some(name) = &self.name {
            name.encode_into(&mut inner);
        }
        if let Some(face_id) = self.face_id {
            write_natural_tlv(&mut inner, TYP_FACE_ID, face_id);
        }
        if let Some(uri) = &self.uri {
            write_tlv(&mut inner, TYP_URI, uri.as_bytes());
        }
        if let Some(cost) = self.cost {
            write_natural_tlv(&mut inner, TYP_ARG_COST, cost);
        }
        if let Some(strategy) = &self.strategy {
            write_wrapped_name(&mut inner, TYP_STRATEGY, strategy);
        }
        if let Some(flags) = self.flags {
            write_natural_tlv(&mut inner, TYP_FLAGS, flags);
        }
        if let Some(origin) = self.origin {
            write_natural_tlv(&mut inner, TYP_ORIGIN, origin);
        }
        if let Some(mask) = self.mask {
            write_natural_tlv(&mut inner, TYP_MASK, mask);
        }
        if let Some(p) = self.face_persistency {
            write_natural_tlv(&mut inner, TYP_FACE_PERSISTENCY, p);
        }
        if let Some(mtu) = self.mtu {
            write_natural_tlv(&mut inner, TYP_MTU, mtu);
        }
        let mut buf = Vec::with_capacity(inner.len() + 8);
        write_tlv(&mut buf, TYP_CONTROL_ARGS, &inner);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut outer = TlvReader::new(buf);
        let (typ, value) = outer.read_tlv()?;
        if typ != TYP_CONTROL_ARGS {
            return Err(TlvError::UnexpectedType { expected: TYP_CONTROL_ARGS, found: typ });
        }
        Self::decode_value(value)
    }

    /// Decode the inner fields (payload of 0x68).
    pub fn decode_value(value: &[u8]) -> Result<Self, TlvError> {
        let mut args = ControlArgs::default();
        let mut r = TlvReader::new(value);
        while !r.done() {
            let (ft, fv) = r.read_tlv()?;
            match ft {
                TYP_NAME => args.name = Some(Name::decode_value(fv)?),
                TYP_FACE_ID => args.face_id = Some(require_natural(fv, "face_id")?),
                TYP_ARG_COST => args.cost = Some(require_natural(fv, "cost")?),
                TYP_ORIGIN => args.origin = Some(require_natural(fv, "origin")?),
                TYP_STRATEGY => args.strategy = Some(read_wrapped_name(fv)?),
                TYP_FLAGS => args.flags = Some(require_natural(fv, "flags")?),
                TYP_MASK => args.mask = Some(require_natural(fv, "mask")?),
                TYP_URI => args.uri = Some(String::from_utf8_lossy(fv).into_owned()),
                TYP_FACE_PERSISTENCY => {
                    args.face_persistency = Some(require_natural(fv, "face_persistency")?)
                }
                TYP_MTU => args.mtu = Some(require_natural(fv, "mtu")?),
                _ => {}
            }
        }
        Ok(args)
    }
}

/// Response to a forwarder control command (0x65).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub status_code: u64,
    pub status_text: String,
    pub body: Option<ControlArgs>,
}

impl ControlResponse {
    pub fn ok(text: &str) -> Self {
        ControlResponse { status_code: 200, status_text: text.to_string(), body: None }
    }

    pub fn error(code: u64, text: &str) -> Self {
        ControlResponse { status_code: code, status_text: text.to_string(), body: None }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut inner = Vec::with_capacity(48);
        write_natural_tlv(&mut inner, TYP_STATUS_CODE, self.status_code);
        write_tlv(&mut inner, TYP_STATUS_TEXT, self.status_text.as_bytes());
        if let Some(body) = &self.body {
            inner.extend_from_slice(&body.encode());
        }
        let mut buf = Vec::with_capacity(inner.len() + 8);
        write_tlv(&mut buf, TYP_CONTROL_RESPONSE, &inner);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, TlvError> {
        let mut outer = TlvReader::new(buf);
        let (typ, value) = outer.read_tlv()?;
        if typ != TYP_CONTROL_RESPONSE {
            return Err(TlvError::UnexpectedType { expected: TYP_CONTROL_RESPONSE, found: typ });
        }

        let mut status_code = None;
        let mut status_text = String::new();
        let mut body = None;

        let mut r = TlvReader::new(value);
        while !r.done() {
            let (ft, fv) = r.read_tlv()?;
            match ft {
                TYP_STATUS_CODE => status_code = Some(require_natural(fv, "status_code")?),
                TYP_STATUS_TEXT => status_text = String::from_utf8_lossy(fv).into_owned(),
                TYP_CONTROL_ARGS => body = Some(ControlArgs::decode_value(fv)?),
                _ => {}
            }
        }

        Ok(ControlResponse {
            status_code: status_code.ok_or(TlvError::MissingField("status_code"))?,
            status_text,
            body,
        })
    }
}
