//! The variable-length "extras" region that may follow a header.
//!
//! Which fields populate depends on both the opcode and the direction of the
//! operation. The layout rules are independent length-guarded conditions, not
//! mutually exclusive branches: an opcode matching none of them leaves every
//! field `None` even when bytes are present on the wire.

use std::fmt;

use crate::protocol::bytes::{DecodeError, decode_i32, decode_u64};
use crate::protocol::header::{Magic, Opcode};

/// Decoded extras. All fields are optional; an absent or unrecognized region
/// yields the all-`None` value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extras {
    /// Client-opaque flags stored alongside a value.
    pub flags: Option<i32>,
    /// Seconds until expiry, or a unix timestamp past 30 days.
    pub expiration: Option<i32>,
    /// Increment/decrement delta.
    pub amount: Option<u64>,
    /// Seed value for increment/decrement when the counter does not exist.
    pub initial_value: Option<u64>,
    /// Verbosity argument; undocumented upstream.
    pub verbosity: Option<i32>,
}

impl Extras {
    /// Decodes the extras region for a given direction and opcode. `region`
    /// is exactly the extras bytes (the header's extras length); a zero
    /// length region decodes to all-`None` regardless of opcode.
    pub fn decode(region: &[u8], magic: Magic, opcode: Opcode) -> Result<Self, DecodeError> {
        let mut extras = Extras::default();
        if region.is_empty() {
            return Ok(extras);
        }

        if magic.is_received() {
            extras.decode_received(region, opcode)?;
        } else {
            extras.decode_requested(region, opcode)?;
        }
        Ok(extras)
    }

    fn decode_received(&mut self, region: &[u8], opcode: Opcode) -> Result<(), DecodeError> {
        // Only the get family carries response extras: the flags stored with
        // the value. Everything else is left uninterpreted.
        if matches!(
            opcode,
            Opcode::Get | Opcode::GetQ | Opcode::GetK | Opcode::GetKq
        ) && region.len() >= 4
        {
            self.flags = Some(decode_i32(region, 0)?);
        }
        Ok(())
    }

    fn decode_requested(&mut self, region: &[u8], opcode: Opcode) -> Result<(), DecodeError> {
        // Set/Add/Replace carry flags (first 4 bytes) and expiration (next 4).
        if matches!(
            opcode,
            Opcode::Set
                | Opcode::SetQ
                | Opcode::Add
                | Opcode::AddQ
                | Opcode::Replace
                | Opcode::ReplaceQ
        ) && region.len() >= 4
        {
            self.flags = Some(decode_i32(region, 0)?);
            if region.len() >= 8 {
                self.expiration = Some(decode_i32(region, 4)?);
            }
        }

        // Increment/Decrement carry an amount, an initial value and an
        // expiration, each only present when the region is long enough.
        if matches!(
            opcode,
            Opcode::Increment | Opcode::IncrementQ | Opcode::Decrement | Opcode::DecrementQ
        ) && region.len() >= 8
        {
            self.amount = Some(decode_u64(region, 0)?);
            if region.len() >= 16 {
                self.initial_value = Some(decode_u64(region, 8)?);
            }
            if region.len() >= 20 {
                self.expiration = Some(decode_i32(region, 16)?);
            }
        }

        // Flush takes an optional expiration: when the flush should happen.
        if matches!(opcode, Opcode::Flush | Opcode::FlushQ) && region.len() >= 4 {
            self.expiration = Some(decode_i32(region, 0)?);
        }

        if opcode == Opcode::Verbosity && region.len() >= 4 {
            self.verbosity = Some(decode_i32(region, 0)?);
        }

        // Get-and-touch takes the new expiration for the touched key.
        if matches!(opcode, Opcode::Gat | Opcode::Gatq) && region.len() >= 4 {
            self.expiration = Some(decode_i32(region, 0)?);
        }

        Ok(())
    }
}

impl fmt::Display for Extras {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Extras")?;
        if let Some(flags) = self.flags {
            write!(f, " :: Flags: {flags}")?;
        }
        if let Some(expiration) = self.expiration {
            write!(f, " :: Expiration: {expiration}")?;
        }
        if let Some(amount) = self.amount {
            write!(f, " :: Amount: {amount}")?;
        }
        if let Some(initial_value) = self.initial_value {
            write!(f, " :: InitialValue: {initial_value}")?;
        }
        if let Some(verbosity) = self.verbosity {
            write!(f, " :: Verbosity: {verbosity}")?;
        }
        write!(f, "]")
    }
}
