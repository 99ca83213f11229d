//! Bounds-checked cursor over a packet payload
//!
//! Every read returns `None` instead of panicking when the payload is
//! shorter than the field being read, so malformed backend packets surface
//! as protocol errors.

use bytes::BufMut;

/// Marker byte for a NULL column value in text result rows
pub const NULL_VALUE: u8 = 0xFB;

#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn peek(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() < n {
            return None;
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Some(head)
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn u16_le(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u24_le(&mut self) -> Option<u32> {
        self.take(3).map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn u32_le(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64_le(&mut self) -> Option<u64> {
        self.take(8).map(|b| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            u64::from_le_bytes(raw)
        })
    }

    /// Length-encoded integer
    pub fn lenenc_int(&mut self) -> Option<u64> {
        match self.u8()? {
            n @ 0..=0xFA => Some(n as u64),
            0xFC => self.u16_le().map(u64::from),
            0xFD => self.u24_le().map(u64::from),
            0xFE => self.u64_le(),
            _ => None,
        }
    }

    /// Length-encoded string
    pub fn lenenc_bytes(&mut self) -> Option<&'a [u8]> {
        let len = self.lenenc_int()?;
        self.take(usize::try_from(len).ok()?)
    }

    /// Length-encoded string that may be the NULL marker (text rows)
    pub fn lenenc_nullable(&mut self) -> Option<Option<&'a [u8]>> {
        if self.peek()? == NULL_VALUE {
            self.skip(1)?;
            return Some(None);
        }
        self.lenenc_bytes().map(Some)
    }

    /// NUL-terminated string; consumes the terminator if present
    pub fn null_terminated(&mut self) -> &'a [u8] {
        match self.buf.iter().position(|&b| b == 0) {
            Some(pos) => {
                let (head, tail) = self.buf.split_at(pos);
                self.buf = &tail[1..];
                head
            }
            None => self.rest(),
        }
    }
}

/// Encode a length-encoded integer
pub fn put_lenenc_int(buf: &mut impl BufMut, value: u64) {
    if value < 251 {
        buf.put_u8(value as u8);
    } else if value < 65536 {
        buf.put_u8(0xFC);
        buf.put_u16_le(value as u16);
    } else if value < 16_777_216 {
        buf.put_u8(0xFD);
        buf.put_uint_le(value, 3);
    } else {
        buf.put_u8(0xFE);
        buf.put_u64_le(value);
    }
}

/// Encode a length-encoded string
pub fn put_lenenc_bytes(buf: &mut impl BufMut, value: &[u8]) {
    put_lenenc_int(buf, value.len() as u64);
    buf.put_slice(value);
}
