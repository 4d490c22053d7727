//! Little-endian encoder used by the tests to build PMX and VMD fixtures in memory.

use crate::types::{Header, IndexWidth, PmxVersion, TextEncoding, VertexIndexWidth};

macro_rules! write_bin {
    ($F:ident,$T:ty) => {
        pub(crate) fn $F(&mut self, value: $T) -> &mut Self {
            self.inner.extend_from_slice(&value.to_le_bytes());
            self
        }
    };
}

#[derive(Default)]
pub(crate) struct BinaryWriter {
    inner: Vec<u8>,
}

impl BinaryWriter {
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.inner
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.extend_from_slice(bytes);
        self
    }

    write_bin!(write_u8, u8);
    write_bin!(write_i8, i8);
    write_bin!(write_u16, u16);
    write_bin!(write_i16, i16);
    write_bin!(write_u32, u32);
    write_bin!(write_i32, i32);
    write_bin!(write_f32, f32);

    pub(crate) fn write_vec2(&mut self, v: [f32; 2]) -> &mut Self {
        v.iter().for_each(|&x| {
            self.write_f32(x);
        });
        self
    }

    pub(crate) fn write_vec3(&mut self, v: [f32; 3]) -> &mut Self {
        v.iter().for_each(|&x| {
            self.write_f32(x);
        });
        self
    }

    pub(crate) fn write_vec4(&mut self, v: [f32; 4]) -> &mut Self {
        v.iter().for_each(|&x| {
            self.write_f32(x);
        });
        self
    }

    pub(crate) fn write_text(&mut self, encoding: TextEncoding, text: &str) -> &mut Self {
        let bytes = encode(encoding, text);
        self.write_i32(bytes.len() as i32);
        self.write_bytes(&bytes)
    }

    /// Shift_JIS, null padded to `length`
    pub(crate) fn write_fixed_text(&mut self, length: usize, text: &str) -> &mut Self {
        let mut bytes = encode(TextEncoding::ShiftJis, text);
        bytes.resize(length, 0);
        self.write_bytes(&bytes)
    }

    pub(crate) fn write_index(&mut self, width: IndexWidth, value: i32) -> &mut Self {
        match width {
            IndexWidth::Width1 => self.write_i8(value as i8),
            IndexWidth::Width2 => self.write_i16(value as i16),
            IndexWidth::Width4 => self.write_i32(value),
        }
    }

    pub(crate) fn write_vertex_index(&mut self, width: VertexIndexWidth, value: u32) -> &mut Self {
        match width {
            VertexIndexWidth::Width1 => self.write_u8(value as u8),
            VertexIndexWidth::Width2 => self.write_u16(value as u16),
            VertexIndexWidth::Width4 => self.write_u32(value),
        }
    }

    /// magic, version and the 8 globals bytes
    pub(crate) fn write_pmx_header(&mut self, header: &Header) -> &mut Self {
        self.write_bytes(b"PMX ");
        self.write_f32(match header.version {
            PmxVersion::V20 => 2.0,
            PmxVersion::V21 => 2.1,
        });
        self.write_u8(8);
        self.write_u8(match header.encoding {
            TextEncoding::Utf16Le => 0,
            _ => 1,
        });
        self.write_u8(header.additional_uv);
        self.write_u8(header.vertex_index.into());
        self.write_u8(header.texture_index.into());
        self.write_u8(header.material_index.into());
        self.write_u8(header.bone_index.into());
        self.write_u8(header.morph_index.into());
        self.write_u8(header.rigid_index.into())
    }
}

fn encode(encoding: TextEncoding, text: &str) -> Vec<u8> {
    match encoding {
        TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
        TextEncoding::ShiftJis => encoding_rs::SHIFT_JIS.encode(text).0.into_owned(),
    }
}
