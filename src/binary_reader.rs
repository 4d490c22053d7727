//! Sequential little-endian reader over an in-memory buffer.

use crate::error::{ParseError, ParseErrorKind, Section};
use crate::types::{IndexWidth, TextEncoding, VertexIndexWidth};
use glam::{Quat, Vec2, Vec3, Vec4};

macro_rules! read_bin {
    ($F:ident,$T:ty) => {
        pub(crate) fn $F(&mut self) -> Result<$T, ParseError> {
            let mut buf = [0_u8; std::mem::size_of::<$T>()];
            buf.copy_from_slice(self.take(std::mem::size_of::<$T>())?);
            Ok(<$T>::from_le_bytes(buf))
        }
    };
}

pub(crate) struct BinaryReader<'a> {
    inner: &'a [u8],
    offset: usize,
    section: Section,
}

impl<'a> BinaryReader<'a> {
    pub(crate) fn new(inner: &'a [u8]) -> Self {
        Self {
            inner,
            offset: 0,
            section: Section::Header,
        }
    }

    /// every error raised after this call is attributed to `section`
    pub(crate) fn enter(&mut self, section: Section) {
        self.section = section;
    }

    pub(crate) fn section(&self) -> Section {
        self.section
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn remaining(&self) -> usize {
        self.inner.len() - self.offset
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// error at the current offset in the current section
    pub(crate) fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(self.section, self.offset, kind)
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if n > self.remaining() {
            return Err(self.error(ParseErrorKind::Truncated {
                needed: n,
                remaining: self.remaining(),
            }));
        }
        let bytes = &self.inner[self.offset..self.offset + n];
        self.offset += n;
        Ok(bytes)
    }

    read_bin!(read_u8, u8);
    read_bin!(read_i8, i8);
    read_bin!(read_u16, u16);
    read_bin!(read_i16, i16);
    read_bin!(read_u32, u32);
    read_bin!(read_i32, i32);
    read_bin!(read_u64, u64);
    read_bin!(read_i64, i64);
    read_bin!(read_f32_bits, f32);

    pub(crate) fn read_f32(&mut self) -> Result<f32, ParseError> {
        let start = self.offset;
        let value = self.read_f32_bits()?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ParseError::new(
                self.section,
                start,
                ParseErrorKind::NonFinite { field: "f32" },
            ))
        }
    }

    pub(crate) fn read_vec2(&mut self) -> Result<Vec2, ParseError> {
        Ok(Vec2::new(self.read_f32()?, self.read_f32()?))
    }

    pub(crate) fn read_vec3(&mut self) -> Result<Vec3, ParseError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub(crate) fn read_vec4(&mut self) -> Result<Vec4, ParseError> {
        Ok(Vec4::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    /// x, y, z, w as stored
    pub(crate) fn read_quat(&mut self) -> Result<Quat, ParseError> {
        Ok(Quat::from_vec4(self.read_vec4()?))
    }

    /// read `0_u8` as `false`, anything else as `true`
    pub(crate) fn read_bool(&mut self) -> Result<bool, ParseError> {
        Ok(self.read_u8()? != 0)
    }

    /// A 4-byte element count that must be non-negative.
    ///
    /// Every element of every section takes at least `min_element_size` bytes,
    /// so a count that cannot fit in the rest of the buffer is reported as truncation
    /// before anything is allocated.
    pub(crate) fn read_count(&mut self, min_element_size: usize) -> Result<usize, ParseError> {
        let start = self.offset;
        let count = self.read_i32()?;
        let count = usize::try_from(count).map_err(|_| {
            ParseError::new(self.section, start, ParseErrorKind::NegativeCount(count))
        })?;
        let needed = count.saturating_mul(min_element_size);
        if needed > self.remaining() {
            return Err(self.error(ParseErrorKind::Truncated {
                needed,
                remaining: self.remaining(),
            }));
        }
        Ok(count)
    }

    /// 4-byte length prefix, then that many bytes in `encoding`
    pub(crate) fn read_text(&mut self, encoding: TextEncoding) -> Result<String, ParseError> {
        let length = self.read_count(1)?;
        let start = self.offset;
        let bytes = self.take(length)?;
        Ok(self.decode(start, bytes, encoding))
    }

    /// fixed-size, null-padded field; decoding stops at the first null byte
    pub(crate) fn read_fixed_text(
        &mut self,
        length: usize,
        encoding: TextEncoding,
    ) -> Result<String, ParseError> {
        let start = self.offset;
        let bytes = self.take(length)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(self.decode(start, &bytes[..end], encoding))
    }

    fn decode(&self, start: usize, bytes: &[u8], encoding: TextEncoding) -> String {
        let (text, had_errors) = encoding
            .encoding()
            .decode_without_bom_handling(bytes);
        if had_errors {
            log::warn!(
                "{} at byte {}: text is not valid {:?}, replaced invalid sequences",
                self.section,
                start,
                encoding
            );
        }
        text.into_owned()
    }

    /// Signed index, so all bits set is -1 at every width.
    pub(crate) fn read_index(&mut self, width: IndexWidth) -> Result<i32, ParseError> {
        match width {
            IndexWidth::Width1 => Ok(i32::from(self.read_i8()?)),
            IndexWidth::Width2 => Ok(i32::from(self.read_i16()?)),
            IndexWidth::Width4 => self.read_i32(),
        }
    }

    pub(crate) fn read_vertex_index(&mut self, width: VertexIndexWidth) -> Result<i64, ParseError> {
        match width {
            VertexIndexWidth::Width1 => Ok(i64::from(self.read_u8()?)),
            VertexIndexWidth::Width2 => Ok(i64::from(self.read_u16()?)),
            VertexIndexWidth::Width4 => Ok(i64::from(self.read_i32()?)),
        }
    }
}
