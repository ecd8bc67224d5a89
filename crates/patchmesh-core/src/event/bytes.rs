//! Cursors over a ring-buffer region
//!
//! A reserved or readable region of the event channel can wrap around the
//! end of the ring, so it comes as two slices. These cursors treat the pair
//! as one contiguous span.

/// Sequential writer over a (possibly wrapped) writable region
pub struct ByteWriter<'a> {
    first: &'a mut [u8],
    second: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(first: &'a mut [u8], second: &'a mut [u8]) -> Self {
        Self {
            first,
            second,
            pos: 0,
        }
    }

    /// Total capacity of the region
    pub fn capacity(&self) -> usize {
        self.first.len() + self.second.len()
    }

    /// Bytes written so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Append raw bytes; returns false (writing nothing) if they don't fit
    pub fn put(&mut self, bytes: &[u8]) -> bool {
        if self.pos + bytes.len() > self.capacity() {
            return false;
        }

        let split = self.first.len();
        for &byte in bytes {
            if self.pos < split {
                self.first[self.pos] = byte;
            } else {
                self.second[self.pos - split] = byte;
            }
            self.pos += 1;
        }
        true
    }

    pub fn put_u8(&mut self, value: u8) -> bool {
        self.put(&[value])
    }

    pub fn put_u16(&mut self, value: u16) -> bool {
        self.put(&value.to_le_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> bool {
        self.put(&value.to_le_bytes())
    }

    pub fn put_u64(&mut self, value: u64) -> bool {
        self.put(&value.to_le_bytes())
    }

    pub fn put_bool(&mut self, value: bool) -> bool {
        self.put_u8(value as u8)
    }

    /// Length-prefixed string (u16 length, UTF-8 bytes)
    pub fn put_str(&mut self, value: &str) -> bool {
        self.put_u16(value.len() as u16) && self.put(value.as_bytes())
    }
}

/// Sequential reader over a (possibly wrapped) readable region
pub struct ByteReader<'a> {
    first: &'a [u8],
    second: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(first: &'a [u8], second: &'a [u8]) -> Self {
        Self {
            first,
            second,
            pos: 0,
        }
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.first.len() + self.second.len() - self.pos
    }

    fn byte_at(&self, pos: usize) -> u8 {
        let split = self.first.len();
        if pos < split {
            self.first[pos]
        } else {
            self.second[pos - split]
        }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.remaining() < N {
            return None;
        }
        let mut out = [0u8; N];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.byte_at(self.pos + i);
        }
        self.pos += N;
        Some(out)
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    pub fn u64(&mut self) -> Option<u64> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    pub fn bool(&mut self) -> Option<bool> {
        self.u8().map(|b| b != 0)
    }

    /// Copy `len` bytes out of the region
    pub fn bytes(&mut self, len: usize) -> Option<Vec<u8>> {
        if self.remaining() < len {
            return None;
        }
        let out = (self.pos..self.pos + len).map(|p| self.byte_at(p)).collect();
        self.pos += len;
        Some(out)
    }

    /// Length-prefixed string written by [`ByteWriter::put_str`]
    pub fn string(&mut self) -> Option<String> {
        let len = self.u16()? as usize;
        String::from_utf8(self.bytes(len)?).ok()
    }
}
