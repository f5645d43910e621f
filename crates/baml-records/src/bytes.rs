//! Little-endian primitives shared by the decoder and the writer.

/// Why a read from a [`Cursor`] failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Shortfall {
    /// More bytes are needed; `needed` counts from the cursor's origin.
    Incomplete { needed: usize },
    /// The bytes are there but do not form a valid value.
    Invalid(String),
}

/// Forward-only reader over a byte slice.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], Shortfall> {
        if self.remaining() < n {
            return Err(Shortfall::Incomplete {
                needed: self.pos + n,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], Shortfall> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, Shortfall> {
        Ok(self.array::<1>()?[0])
    }

    pub fn bool(&mut self) -> Result<bool, Shortfall> {
        Ok(self.u8()? != 0)
    }

    pub fn i16(&mut self) -> Result<i16, Shortfall> {
        self.array().map(i16::from_le_bytes)
    }

    pub fn u16(&mut self) -> Result<u16, Shortfall> {
        self.array().map(u16::from_le_bytes)
    }

    pub fn i32(&mut self) -> Result<i32, Shortfall> {
        self.array().map(i32::from_le_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, Shortfall> {
        self.array().map(u32::from_le_bytes)
    }

    /// 7-bit encoded unsigned integer, at most five bytes.
    pub fn varint(&mut self) -> Result<u32, Shortfall> {
        let mut value: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.u8()?;
            if shift == 28 && byte > 0x0f {
                return Err(Shortfall::Invalid("7-bit encoded integer overflows u32".into()));
            }
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(Shortfall::Invalid("7-bit encoded integer is too long".into()))
    }

    pub fn string(&mut self) -> Result<String, Shortfall> {
        let len = self.varint()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| Shortfall::Invalid(format!("string is not UTF-8: {e}")))
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    /// Fail if any bytes are left over.
    pub fn finish(&self) -> Result<(), Shortfall> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Shortfall::Invalid(format!("{n} trailing bytes in payload"))),
        }
    }
}

pub(crate) fn put_varint(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

pub(crate) fn put_string(out: &mut Vec<u8>, value: &str) {
    put_varint(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    #[test]
    fn test_varint_boundaries() {
        for value in [0u32, 1, 0x7f, 0x80, 0x3fff, 0x4000, u32::MAX] {
            let mut out = Vec::new();
            put_varint(&mut out, value);
            let mut cursor = Cursor::new(&out);
            assert_eq!(cursor.varint(), Ok(value));
            assert_eq!(cursor.remaining(), 0);
        }
    }

    #[test]
    fn test_varint_incomplete() {
        let mut cursor = Cursor::new(&[0x80, 0x80]);
        assert_eq!(cursor.varint(), Err(Shortfall::Incomplete { needed: 3 }));
    }

    #[test]
    fn test_varint_overflow() {
        let mut cursor = Cursor::new(&[0xff, 0xff, 0xff, 0xff, 0x7f]);
        assert!(matches!(cursor.varint(), Err(Shortfall::Invalid(_))));
    }

    #[test]
    fn test_string_not_utf8() {
        let mut cursor = Cursor::new(&[2, 0xc3, 0x28]);
        assert!(matches!(cursor.string(), Err(Shortfall::Invalid(_))));
    }
}
