//! MSB-first bit reader with Exp-Golomb support.

use crate::video::sps::SpsError;

pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn read_bit(&mut self) -> Result<bool, SpsError> {
        let byte = self.data.get(self.pos / 8).ok_or(SpsError::Truncated)?;
        let bit = (byte >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(bit == 1)
    }

    pub(crate) fn read_bits(&mut self, count: u32) -> Result<u32, SpsError> {
        debug_assert!(count <= 32);
        let mut value = 0u32;
        for _ in 0..count {
            value = (value << 1) | u32::from(self.read_bit()?);
        }
        Ok(value)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, SpsError> {
        Ok(self.read_bits(8)? as u8)
    }

    /// Unsigned Exp-Golomb code, `ue(v)`.
    pub(crate) fn read_ue(&mut self) -> Result<u32, SpsError> {
        let mut leading_zeros = 0u32;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(SpsError::InvalidExpGolomb);
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = self.read_bits(leading_zeros)?;
        // 2^31 - 1 + suffix can exceed u32 only for leading_zeros == 31.
        (1u32 << leading_zeros)
            .checked_sub(1)
            .and_then(|base| base.checked_add(suffix))
            .ok_or(SpsError::InvalidExpGolomb)
    }

    /// Signed Exp-Golomb code, `se(v)`.
    pub(crate) fn read_se(&mut self) -> Result<i32, SpsError> {
        let code = self.read_ue()?;
        let magnitude = i32::try_from(code / 2 + code % 2).map_err(|_| SpsError::InvalidExpGolomb)?;
        Ok(if code % 2 == 1 { magnitude } else { -magnitude })
    }
}
