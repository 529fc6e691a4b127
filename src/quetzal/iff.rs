//! IFF (Interchange File Format) container handling for Quetzal files.
//!
//! This operates purely on in-memory byte buffers. The core never touches
//! the filesystem directly; the embedding program reads/writes save bytes
//! through the I/O port's save-blob operations.

/// IFF container.
pub struct IffFile {
    /// Form type - "IFZS" for Quetzal.
    pub form_type: [u8; 4],
    pub chunks: Vec<IffChunk>,
}

/// Individual chunk in an IFF container.
pub struct IffChunk {
    pub chunk_type: [u8; 4],
    pub data: Vec<u8>,
}

impl Default for IffFile {
    fn default() -> Self {
        Self::new()
    }
}

impl IffFile {
    pub fn new() -> Self {
        IffFile {
            form_type: *b"IFZS",
            chunks: Vec::new(),
        }
    }

    pub fn add_chunk(&mut self, chunk_type: [u8; 4], data: Vec<u8>) {
        self.chunks.push(IffChunk { chunk_type, data });
    }

    /// Serialize to the on-wire FORM/chunk byte stream.
    pub fn to_bytes(&self) -> Vec<u8> {
        let total_size = 4
            + self
                .chunks
                .iter()
                .map(|c| 8 + c.data.len() + (c.data.len() % 2))
                .sum::<usize>();

        let mut out = Vec::with_capacity(8 + total_size);
        out.extend_from_slice(b"FORM");
        out.extend_from_slice(&(total_size as u32).to_be_bytes());
        out.extend_from_slice(&self.form_type);

        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.chunk_type);
            out.extend_from_slice(&(chunk.data.len() as u32).to_be_bytes());
            out.extend_from_slice(&chunk.data);
            if chunk.data.len() % 2 == 1 {
                out.push(0);
            }
        }

        out
    }

    /// Parse a FORM/chunk byte stream produced by `to_bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < 12 {
            return Err("save data too short to be an IFF file".to_string());
        }
        if &bytes[0..4] != b"FORM" {
            return Err("not an IFF file (missing FORM header)".to_string());
        }

        let form_type: [u8; 4] = bytes[8..12].try_into().unwrap();
        let mut iff = IffFile {
            form_type,
            chunks: Vec::new(),
        };

        let mut pos = 12;
        while pos + 8 <= bytes.len() {
            let chunk_type: [u8; 4] = bytes[pos..pos + 4].try_into().unwrap();
            let chunk_size =
                u32::from_be_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
            pos += 8;

            if pos + chunk_size > bytes.len() {
                return Err(format!(
                    "truncated chunk {:?}: need {} bytes, have {}",
                    std::str::from_utf8(&chunk_type).unwrap_or("????"),
                    chunk_size,
                    bytes.len() - pos
                ));
            }

            let data = bytes[pos..pos + chunk_size].to_vec();
            pos += chunk_size;
            if chunk_size % 2 == 1 {
                pos += 1;
            }

            iff.chunks.push(IffChunk { chunk_type, data });
        }

        Ok(iff)
    }

    pub fn find_chunk(&self, chunk_type: &[u8; 4]) -> Option<&IffChunk> {
        self.chunks.iter().find(|c| &c.chunk_type == chunk_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_chunks() {
        let mut iff = IffFile::new();
        iff.add_chunk(*b"IFhd", vec![1, 2, 3]);
        iff.add_chunk(*b"Stks", vec![4, 5, 6, 7]);

        let bytes = iff.to_bytes();
        let parsed = IffFile::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.form_type, *b"IFZS");
        assert_eq!(parsed.find_chunk(b"IFhd").unwrap().data, vec![1, 2, 3]);
        assert_eq!(parsed.find_chunk(b"Stks").unwrap().data, vec![4, 5, 6, 7]);
    }

    #[test]
    fn rejects_non_iff_data() {
        assert!(IffFile::from_bytes(b"not an iff file at all").is_err());
    }
}
