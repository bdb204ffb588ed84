//! A single decoded protocol operation: header, optional extras, and key.

use std::fmt;

use crate::protocol::extras::Extras;
use crate::protocol::header::{Header, Magic, Opcode};

/// One operation demultiplexed out of a transport payload. The value bytes
/// that follow the key are never retained, only skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub header: Header,
    pub extras: Option<Extras>,
    /// May be empty: responses generally omit the key, as do keyless
    /// commands like NoOp.
    pub key: String,
}

impl Operation {
    pub fn new(header: Header, extras: Option<Extras>, key: String) -> Self {
        Operation {
            header,
            extras,
            key,
        }
    }

    pub fn magic(&self) -> Magic {
        self.header.magic
    }

    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.header, self.key)?;
        if let Some(extras) = &self.extras {
            write!(f, " %% {extras}")?;
        }
        Ok(())
    }
}
