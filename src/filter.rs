//! Operation-level filtering.
//!
//! The pipeline only depends on [`OperationPredicate`]; the shipped
//! implementation is [`ClausePredicate`], a small comma-separated clause
//! matcher. Each clause is `field=value` or `field!=value`, all clauses must
//! hold, and `key` values are glob patterns.

use std::fmt;

use globset::{Glob, GlobMatcher};
use thiserror::Error;

use crate::protocol::{Magic, Operation, Packet};

/// Evaluation context handed to a predicate alongside the operation. The
/// enclosing packet is addressable through the fixed name `packet`.
pub struct FilterContext<'a> {
    packet: &'a Packet,
}

impl<'a> FilterContext<'a> {
    pub fn new(packet: &'a Packet) -> Self {
        FilterContext { packet }
    }

    pub fn packet(&self) -> &Packet {
        self.packet
    }
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("empty filter clause")]
    EmptyClause,

    #[error("clause {clause:?} is not field=value or field!=value")]
    MalformedClause { clause: String },

    #[error("unknown filter field {name:?}")]
    UnknownField { name: String },

    #[error("operation has no {field} to match against")]
    MissingValue { field: &'static str },

    #[error(transparent)]
    Glob(#[from] globset::Error),
}

/// A boolean predicate over a single decoded operation.
pub trait OperationPredicate {
    fn evaluate(&self, operation: &Operation, ctx: &FilterContext<'_>)
    -> Result<bool, FilterError>;
}

/// The addressable fields of a clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Key,
    Opcode,
    Magic,
    Status,
    PacketPort,
    PacketSource,
    PacketDestination,
}

impl Field {
    fn parse(name: &str) -> Result<Self, FilterError> {
        match name {
            "key" => Ok(Field::Key),
            "opcode" => Ok(Field::Opcode),
            "magic" => Ok(Field::Magic),
            "status" => Ok(Field::Status),
            "packet.port" => Ok(Field::PacketPort),
            "packet.source" => Ok(Field::PacketSource),
            "packet.destination" => Ok(Field::PacketDestination),
            _ => Err(FilterError::UnknownField {
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Key => "key",
            Field::Opcode => "opcode",
            Field::Magic => "magic",
            Field::Status => "status",
            Field::PacketPort => "packet.port",
            Field::PacketSource => "packet.source",
            Field::PacketDestination => "packet.destination",
        };
        f.write_str(name)
    }
}

enum Matcher {
    Glob(GlobMatcher),
    Text(String),
}

struct Clause {
    field: Field,
    negate: bool,
    matcher: Matcher,
}

impl Clause {
    fn compile(raw: &str) -> Result<Self, FilterError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FilterError::EmptyClause);
        }

        let (name, value, negate) = if let Some((name, value)) = raw.split_once("!=") {
            (name, value, true)
        } else if let Some((name, value)) = raw.split_once('=') {
            (name, value, false)
        } else {
            return Err(FilterError::MalformedClause {
                clause: raw.to_string(),
            });
        };

        let field = Field::parse(name.trim())?;
        let value = value.trim();

        let matcher = match field {
            Field::Key => Matcher::Glob(Glob::new(value)?.compile_matcher()),
            _ => Matcher::Text(value.to_lowercase()),
        };

        Ok(Clause {
            field,
            negate,
            matcher,
        })
    }

    fn holds(&self, operation: &Operation, ctx: &FilterContext<'_>) -> Result<bool, FilterError> {
        let matched = match (&self.matcher, self.field) {
            (Matcher::Glob(glob), _) => glob.is_match(&operation.key),
            (Matcher::Text(want), field) => {
                let have = self.field_value(field, operation, ctx)?;
                have.to_lowercase() == *want
            }
        };
        Ok(matched != self.negate)
    }

    fn field_value(
        &self,
        field: Field,
        operation: &Operation,
        ctx: &FilterContext<'_>,
    ) -> Result<String, FilterError> {
        let value = match field {
            Field::Key => operation.key.clone(),
            Field::Opcode => operation.opcode().to_string(),
            Field::Magic => match operation.magic() {
                Magic::Requested => "requested".to_string(),
                Magic::Received => "received".to_string(),
                Magic::Other(byte) => byte.to_string(),
            },
            Field::Status => operation.header.status().to_string(),
            Field::PacketPort => ctx.packet().port.to_string(),
            Field::PacketSource => ctx
                .packet()
                .source
                .ok_or(FilterError::MissingValue { field: "source" })?
                .to_string(),
            Field::PacketDestination => ctx
                .packet()
                .destination
                .ok_or(FilterError::MissingValue {
                    field: "destination",
                })?
                .to_string(),
        };
        Ok(value)
    }
}

/// A conjunction of `field=value` / `field!=value` clauses.
pub struct ClausePredicate {
    clauses: Vec<Clause>,
}

impl ClausePredicate {
    /// Compiles an expression like `opcode=Set,key=session:*,status!=NoError`.
    /// Any malformed clause fails the whole compile.
    pub fn compile(expression: &str) -> Result<Self, FilterError> {
        let clauses = expression
            .split(',')
            .map(Clause::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ClausePredicate { clauses })
    }
}

impl OperationPredicate for ClausePredicate {
    fn evaluate(
        &self,
        operation: &Operation,
        ctx: &FilterContext<'_>,
    ) -> Result<bool, FilterError> {
        for clause in &self.clauses {
            if !clause.holds(operation, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::protocol::{HEADER_LEN, Header};

    fn operation(magic: u8, opcode: u8, key: &str) -> Operation {
        let mut raw = [0u8; HEADER_LEN];
        raw[0] = magic;
        raw[1] = opcode;
        let header = Header::decode(&raw, 0).unwrap();
        Operation::new(header, None, key.to_string())
    }

    fn packet(port: u16) -> Packet {
        Packet {
            time: SystemTime::UNIX_EPOCH,
            source: Some("10.0.0.1".parse().unwrap()),
            destination: Some("10.0.0.2".parse().unwrap()),
            size: 64,
            port,
            operations: Vec::new(),
            op_count: 0,
        }
    }

    #[test]
    fn matches_opcode_case_insensitively() {
        let predicate = ClausePredicate::compile("opcode=set").unwrap();
        let pkt = packet(11211);
        let ctx = FilterContext::new(&pkt);

        let set = operation(0x80, 0x01, "a");
        let get = operation(0x80, 0x00, "a");
        assert!(predicate.evaluate(&set, &ctx).unwrap());
        assert!(!predicate.evaluate(&get, &ctx).unwrap());
    }

    #[test]
    fn key_clauses_are_globs() {
        let predicate = ClausePredicate::compile("key=session:*").unwrap();
        let pkt = packet(11211);
        let ctx = FilterContext::new(&pkt);

        assert!(
            predicate
                .evaluate(&operation(0x80, 0x00, "session:42"), &ctx)
                .unwrap()
        );
        assert!(
            !predicate
                .evaluate(&operation(0x80, 0x00, "user:42"), &ctx)
                .unwrap()
        );
    }

    #[test]
    fn negated_clause_inverts_the_match() {
        let predicate = ClausePredicate::compile("key!=noise:*").unwrap();
        let pkt = packet(11211);
        let ctx = FilterContext::new(&pkt);

        assert!(
            predicate
                .evaluate(&operation(0x80, 0x00, "session:1"), &ctx)
                .unwrap()
        );
        assert!(
            !predicate
                .evaluate(&operation(0x80, 0x00, "noise:1"), &ctx)
                .unwrap()
        );
    }

    #[test]
    fn clauses_are_a_conjunction() {
        let predicate = ClausePredicate::compile("magic=requested, opcode=delete").unwrap();
        let pkt = packet(11211);
        let ctx = FilterContext::new(&pkt);

        assert!(
            predicate
                .evaluate(&operation(0x80, 0x04, "k"), &ctx)
                .unwrap()
        );
        assert!(
            !predicate
                .evaluate(&operation(0x81, 0x04, "k"), &ctx)
                .unwrap()
        );
        assert!(
            !predicate
                .evaluate(&operation(0x80, 0x00, "k"), &ctx)
                .unwrap()
        );
    }

    #[test]
    fn packet_fields_are_reachable_through_the_context() {
        let predicate = ClausePredicate::compile("packet.port=11211").unwrap();
        let hit = packet(11211);
        let miss = packet(11212);
        let op = operation(0x80, 0x00, "k");

        assert!(predicate.evaluate(&op, &FilterContext::new(&hit)).unwrap());
        assert!(!predicate.evaluate(&op, &FilterContext::new(&miss)).unwrap());
    }

    #[test]
    fn status_matches_symbolic_name() {
        let mut raw = [0u8; HEADER_LEN];
        raw[0] = 0x81;
        raw[1] = 0x00;
        raw[6] = 0x00;
        raw[7] = 0x01; // KeyNotFound
        let header = Header::decode(&raw, 0).unwrap();
        let op = Operation::new(header, None, String::new());

        let predicate = ClausePredicate::compile("status=keynotfound").unwrap();
        let pkt = packet(11211);
        assert!(predicate.evaluate(&op, &FilterContext::new(&pkt)).unwrap());
    }

    #[test]
    fn missing_packet_address_is_an_evaluation_error() {
        let predicate = ClausePredicate::compile("packet.source=10.0.0.1").unwrap();
        let mut pkt = packet(11211);
        pkt.source = None;
        let op = operation(0x80, 0x00, "k");

        let err = predicate
            .evaluate(&op, &FilterContext::new(&pkt))
            .unwrap_err();
        assert!(matches!(err, FilterError::MissingValue { field: "source" }));
    }

    #[test]
    fn compile_rejects_unknown_fields_and_malformed_clauses() {
        assert!(matches!(
            ClausePredicate::compile("nonsense=1"),
            Err(FilterError::UnknownField { .. })
        ));
        assert!(matches!(
            ClausePredicate::compile("opcode"),
            Err(FilterError::MalformedClause { .. })
        ));
        assert!(matches!(
            ClausePredicate::compile("opcode=get,"),
            Err(FilterError::EmptyClause)
        ));
        assert!(matches!(
            ClausePredicate::compile("key=[bad-glob"),
            Err(FilterError::Glob(_))
        ));
    }
}
