//! Exact rescaling of amounts between source and destination minimal units

use crate::error::ConversionError;

/// Rescales amounts by a fixed power of ten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountConverter {
    source_decimals: u32,
    dest_decimals: u32,
    factor: u128,
}

impl AmountConverter {
    /// Fails when the destination has fewer decimals than the source, or
    /// when the shift factor itself does not fit the amount width.
    pub fn new(source_decimals: u32, dest_decimals: u32) -> Result<Self, ConversionError> {
        if dest_decimals < source_decimals {
            return Err(ConversionError::UnsupportedDirection {
                source_decimals,
                dest_decimals,
            });
        }
        let shift = dest_decimals - source_decimals;
        let factor = 10u128
            .checked_pow(shift)
            .ok_or(ConversionError::Overflow { amount: 1, shift })?;

        Ok(Self {
            source_decimals,
            dest_decimals,
            factor,
        })
    }

    pub fn shift(&self) -> u32 {
        self.dest_decimals - self.source_decimals
    }

    pub fn source_decimals(&self) -> u32 {
        self.source_decimals
    }

    pub fn dest_decimals(&self) -> u32 {
        self.dest_decimals
    }

    /// Source minimal units to destination minimal units
    pub fn convert(&self, source_amount: u128) -> Result<u128, ConversionError> {
        source_amount
            .checked_mul(self.factor)
            .ok_or(ConversionError::Overflow {
                amount: source_amount,
                shift: self.shift(),
            })
    }

    /// Destination minimal units back to source minimal units. Fails instead
    /// of truncating when the amount carries sub-source-unit digits.
    pub fn revert(&self, dest_amount: u128) -> Result<u128, ConversionError> {
        if dest_amount % self.factor != 0 {
            return Err(ConversionError::Inexact {
                amount: dest_amount,
                shift: self.shift(),
            });
        }
        Ok(dest_amount / self.factor)
    }
}

/// `source_amount * 10^(dest_decimals - source_decimals)`
pub fn convert(
    source_amount: u128,
    source_decimals: u32,
    dest_decimals: u32,
) -> Result<u128, ConversionError> {
    AmountConverter::new(source_decimals, dest_decimals)?.convert(source_amount)
}
