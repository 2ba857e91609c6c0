//! Little-endian primitive codec
//!
//! Every multi-byte value on the NatNet wire is little-endian. This module
//! provides a bounds-checked [`ByteReader`] cursor for decoding and a
//! [`ByteWriter`] for composing requests (and synthetic packets in tests),
//! plus offset-based free functions for one-off reads.
//!
//! Reads past the end of the buffer never truncate silently: they return
//! [`NatNetError::Truncated`] with the offset, the bytes needed and the bytes
//! still available.

use crate::{NatNetError, Result};

/// Three-component float vector (position, offset).
pub type Vec3 = [f32; 3];

/// Four-component float vector (orientation quaternion, x/y/z/w order on the wire).
pub type Quat = [f32; 4];

/// Bounds-checked little-endian cursor over a borrowed packet.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Create a reader positioned at `offset`.
    pub fn at(buf: &'a [u8], offset: usize) -> Self {
        Self { buf, pos: offset }
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take the next `n` bytes, advancing the cursor.
    pub fn take(&mut self, n: usize, context: &str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.buf.len()).ok_or_else(|| {
            NatNetError::truncated(context, self.pos, n, self.remaining())
        })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize, context: &str) -> Result<()> {
        self.take(n, context).map(|_| ())
    }

    fn take_array<const N: usize>(&mut self, context: &str) -> Result<[u8; N]> {
        let bytes = self.take(N, context)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self, context: &str) -> Result<u8> {
        Ok(self.take_array::<1>(context)?[0])
    }

    pub fn read_u16(&mut self, context: &str) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array(context)?))
    }

    pub fn read_u32(&mut self, context: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array(context)?))
    }

    pub fn read_i32(&mut self, context: &str) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take_array(context)?))
    }

    pub fn read_u64(&mut self, context: &str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array(context)?))
    }

    pub fn read_f32(&mut self, context: &str) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take_array(context)?))
    }

    pub fn read_f64(&mut self, context: &str) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take_array(context)?))
    }

    /// Read `N` consecutive 32-bit floats.
    pub fn read_floats<const N: usize>(&mut self, context: &str) -> Result<[f32; N]> {
        let bytes = self.take(N * 4, context)?;
        let mut out = [0f32; N];
        for (value, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(out)
    }

    pub fn read_vec3(&mut self, context: &str) -> Result<Vec3> {
        self.read_floats::<3>(context)
    }

    pub fn read_quat(&mut self, context: &str) -> Result<Quat> {
        self.read_floats::<4>(context)
    }

    /// Read a 4-byte signed element count.
    ///
    /// Negative counts and counts that could not possibly fit in the remaining
    /// bytes (given the minimum encoded size of one element) are rejected.
    pub fn read_count(&mut self, context: &str, min_element_size: usize) -> Result<usize> {
        let offset = self.pos;
        let raw = self.read_i32(context)?;
        let count = usize::try_from(raw).map_err(|_| {
            NatNetError::malformed(context, offset, format!("negative element count {}", raw))
        })?;
        if min_element_size > 0 && count.saturating_mul(min_element_size) > self.remaining() {
            return Err(NatNetError::malformed(
                context,
                offset,
                format!(
                    "count {} needs at least {} bytes, only {} remain",
                    count,
                    count.saturating_mul(min_element_size),
                    self.remaining()
                ),
            ));
        }
        Ok(count)
    }

    /// Read a NUL-terminated string and advance past the terminator.
    pub fn read_cstr(&mut self, context: &str) -> Result<String> {
        let (value, next) = decode_cstr(self.buf, self.pos, context)?;
        self.pos = next;
        Ok(value)
    }

    /// Read a fixed-width NUL-padded string field.
    pub fn read_fixed_str(&mut self, width: usize, context: &str) -> Result<String> {
        let bytes = self.take(width, context)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

/// Growable little-endian packet writer.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_f32(&mut self, value: f32) -> &mut Self {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_f64(&mut self, value: f64) -> &mut Self {
        self.put_bytes(&value.to_le_bytes())
    }

    pub fn put_floats(&mut self, values: &[f32]) -> &mut Self {
        for value in values {
            self.put_f32(*value);
        }
        self
    }

    /// Write a collection length as the wire's 4-byte signed count.
    pub fn put_count(&mut self, count: usize) -> &mut Self {
        self.put_i32(i32::try_from(count).unwrap_or(i32::MAX))
    }

    /// Write `value` followed by a NUL terminator.
    pub fn put_cstr(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes()).put_u8(0)
    }

    /// Write `value` NUL-padded to exactly `width` bytes (truncating if longer).
    pub fn put_fixed_str(&mut self, value: &str, width: usize) -> &mut Self {
        let bytes = value.as_bytes();
        let len = bytes.len().min(width.saturating_sub(1));
        self.put_bytes(&bytes[..len]);
        self.buf.resize(self.buf.len() + (width - len), 0);
        self
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Decode an `n`-byte (1..=8) little-endian unsigned integer at `offset`.
pub fn decode_uint(data: &[u8], offset: usize, n: usize) -> Result<u64> {
    if n == 0 || n > 8 {
        return Err(NatNetError::malformed(
            "Integer decoding",
            offset,
            format!("unsupported integer width {}", n),
        ));
    }
    let bytes = ByteReader::at(data, offset).take(n, "Integer decoding")?;
    Ok(bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

/// Encode the low `n` bytes (1..=8) of `value` little-endian.
pub fn encode_uint(value: u64, n: usize) -> Result<Vec<u8>> {
    if n == 0 || n > 8 {
        return Err(NatNetError::malformed(
            "Integer encoding",
            0,
            format!("unsupported integer width {}", n),
        ));
    }
    Ok(value.to_le_bytes()[..n].to_vec())
}

pub fn decode_f32(data: &[u8], offset: usize) -> Result<f32> {
    ByteReader::at(data, offset).read_f32("Float decoding")
}

pub fn decode_f64(data: &[u8], offset: usize) -> Result<f64> {
    ByteReader::at(data, offset).read_f64("Double decoding")
}

/// Decode `N` consecutive floats (2, 3, 4 and 12 are the sizes on the wire).
pub fn decode_floats<const N: usize>(data: &[u8], offset: usize) -> Result<[f32; N]> {
    ByteReader::at(data, offset).read_floats::<N>("Float vector decoding")
}

pub fn encode_floats(values: &[f32]) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(values.len() * 4);
    writer.put_floats(values);
    writer.into_inner()
}

/// Decode a NUL-terminated string starting at `offset`.
///
/// Returns the string and the offset immediately past the terminator.
pub fn decode_cstr(data: &[u8], offset: usize, context: &str) -> Result<(String, usize)> {
    let tail = data.get(offset..).ok_or_else(|| NatNetError::truncated(context, offset, 1, 0))?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| NatNetError::truncated(context, offset, tail.len() + 1, tail.len()))?;
    let value = String::from_utf8_lossy(&tail[..end]).into_owned();
    Ok((value, offset + end + 1))
}
