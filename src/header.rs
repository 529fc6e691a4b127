use crate::config::Config;
use std::fmt;

/// The first 64 bytes of a story file.
///
/// Only the fields the core cares about are parsed eagerly; everything else
/// in the header is left in `memory` and addressed directly by opcode
/// handlers that need it (e.g. the alphabet/unicode override tables).
#[derive(Debug, Clone)]
pub struct Header {
    pub version: u8,
    pub flags1: u8,
    pub release: u16,
    pub base_high_mem: usize,
    pub initial_pc: usize,
    pub dictionary: usize,
    pub object_table_addr: usize,
    pub global_variables: usize,
    pub base_static_mem: usize,
    pub serial: [u8; 6],
    pub flags2: u16,
    pub abbrev_table: usize,
    /// File length in bytes, after applying the version-dependent multiplier.
    pub file_length: usize,
    pub checksum_file: u16,
    /// v6/7 only: routine/string packed-address offsets (words).
    pub routine_offset: usize,
    pub string_offset: usize,
    /// v5+ only: alphabet table override address, 0 if absent (use defaults).
    pub alphabet_table: usize,
    /// v5+ only: header extension table address, 0 if absent.
    pub header_extension: usize,
    pub standard_revision: u16,
}

fn word_at(bytes: &[u8], addr: usize) -> u16 {
    ((bytes[addr] as u16) << 8) | bytes[addr + 1] as u16
}

fn set_bit(byte: &mut u8, bit: u8, value: bool) {
    let mask = 1 << bit;
    if value {
        *byte |= mask;
    } else {
        *byte &= !mask;
    }
}

/// Multiplier applied to the header's file-length word, per §3/GLOSSARY.
pub fn file_length_multiplier(version: u8) -> usize {
    match version {
        1..=3 => 2,
        4..=5 => 4,
        _ => 8,
    }
}

/// Multiplier applied to packed routine/string addresses, per §3.
pub fn packed_addr_multiplier(version: u8) -> usize {
    match version {
        1..=3 => 2,
        4..=5 => 4,
        6..=7 => 4, // plus the routine/string offset word, applied separately
        _ => 8,     // v8
    }
}

impl Header {
    pub fn new(bytes: &[u8]) -> Result<Header, String> {
        if bytes.len() < 64 {
            return Err("story file shorter than the 64-byte header".to_string());
        }

        let version = bytes[0];
        let static_start = word_at(bytes, 0x0E) as usize;
        if !(64..=bytes.len()).contains(&static_start) {
            return Err(format!(
                "invalid static memory base 0x{static_start:04x}: must be in [64, file length]"
            ));
        }

        let mut serial = [0u8; 6];
        serial.copy_from_slice(&bytes[0x12..0x18]);

        let (routine_offset, string_offset) = if version >= 6 {
            (
                word_at(bytes, 0x28) as usize * 8,
                word_at(bytes, 0x2A) as usize * 8,
            )
        } else {
            (0, 0)
        };

        let header_extension = if version >= 5 {
            word_at(bytes, 0x36) as usize
        } else {
            0
        };

        // Custom alphabet table address lives directly at 0x34 (v5+), not in
        // the header extension table.
        let alphabet_table = if version >= 5 {
            word_at(bytes, 0x34) as usize
        } else {
            0
        };

        Ok(Header {
            version,
            flags1: bytes[0x01],
            release: word_at(bytes, 0x02),
            base_high_mem: word_at(bytes, 0x04) as usize,
            initial_pc: word_at(bytes, 0x06) as usize,
            dictionary: word_at(bytes, 0x08) as usize,
            object_table_addr: word_at(bytes, 0x0A) as usize,
            global_variables: word_at(bytes, 0x0C) as usize,
            base_static_mem: static_start,
            serial,
            flags2: word_at(bytes, 0x10),
            abbrev_table: word_at(bytes, 0x18) as usize,
            file_length: word_at(bytes, 0x1A) as usize * file_length_multiplier(version),
            checksum_file: word_at(bytes, 0x1C),
            routine_offset,
            string_offset,
            alphabet_table,
            header_extension,
            standard_revision: word_at(bytes, 0x32),
        })
    }

    /// Static memory upper bound, per §3: `min(N, 0x10000)`.
    pub fn static_end(&self, file_size: usize) -> usize {
        file_size.min(0x10000)
    }

    /// Unpack a routine address into a byte address.
    pub fn unpack_routine(&self, packed: u16) -> usize {
        packed as usize * packed_addr_multiplier(self.version) + self.routine_offset
    }

    /// Unpack a string address into a byte address.
    pub fn unpack_string(&self, packed: u16) -> usize {
        packed as usize * packed_addr_multiplier(self.version) + self.string_offset
    }

    /// Rewrites the header's **Rst** ("reset by interpreter") fields from a
    /// [`Config`]. Called once at load and again after any successful
    /// restore/undo-restore, per §3/§4.6 — these bits are owned by the
    /// interpreter, not the program, so a saved copy of them is never
    /// trusted.
    pub fn apply_capability_flags(&self, memory: &mut [u8], config: &Config) {
        if memory.len() < 0x40 {
            return;
        }
        if self.version >= 4 {
            let mut flags1 = memory[0x01];
            set_bit(&mut flags1, 0, !config.disable_color);
            set_bit(&mut flags1, 4, !config.disable_graphics_font);
            set_bit(&mut flags1, 7, !config.disable_timed);
            memory[0x01] = flags1;
            memory[0x1E] = config.int_number;
            memory[0x1F] = config.int_version;
        } else {
            let mut flags1 = memory[0x01];
            set_bit(&mut flags1, 4, true); // status line available
            set_bit(&mut flags1, 5, true); // screen-splitting available
            set_bit(&mut flags1, 6, !config.disable_fixed); // variable-pitch font default
            if config.enable_censorship {
                set_bit(&mut flags1, 2, true);
            }
            memory[0x01] = flags1;
        }
    }

    /// Address of the optional Unicode translation table (header extension
    /// word 4), or 0 if the story doesn't declare one.
    pub fn unicode_table_addr(&self, memory: &[u8]) -> usize {
        if self.header_extension == 0 {
            return 0;
        }
        let words_present = word_at(memory, self.header_extension) as usize;
        if words_present < 3 || self.header_extension + 8 + 1 >= memory.len() {
            return 0;
        }
        word_at(memory, self.header_extension + 8) as usize
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Z-code version:           {}\n\
             Release number:           {}\n\
             Serial number:            {}\n\
             High memory base:         {:#06x}\n\
             Start PC:                 {:#06x}\n\
             Dictionary address:       {:#06x}\n\
             Object table address:     {:#06x}\n\
             Global variables address: {:#06x}\n\
             Static memory base:       {:#06x}\n\
             Abbreviations address:    {:#06x}\n\
             File length:              {:#06x}\n\
             Checksum:                 {:#06x}\n",
            self.version,
            self.release,
            String::from_utf8_lossy(&self.serial),
            self.base_high_mem,
            self.initial_pc,
            self.dictionary,
            self.object_table_addr,
            self.global_variables,
            self.base_static_mem,
            self.abbrev_table,
            self.file_length,
            self.checksum_file,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(version: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; 0x40];
        bytes[0x00] = version;
        bytes[0x02] = 0x00;
        bytes[0x03] = 0x01; // release 1
        bytes[0x04] = 0x10;
        bytes[0x05] = 0x00; // high mem 0x1000
        bytes[0x06] = 0x00;
        bytes[0x07] = 0x40; // initial pc 0x0040
        bytes[0x08] = 0x01;
        bytes[0x09] = 0x24; // dictionary
        bytes[0x0A] = 0x01;
        bytes[0x0B] = 0x00; // object table
        bytes[0x0C] = 0x02;
        bytes[0x0D] = 0xC0; // globals
        bytes[0x0E] = 0x04;
        bytes[0x0F] = 0x00; // static mem base 0x0400
        bytes[0x1A] = 0x02;
        bytes[0x1B] = 0x00; // file length word 0x0200
        bytes
    }

    #[test]
    fn parses_v3_header_fields() {
        let bytes = sample_header(3);
        let h = Header::new(&bytes).unwrap();
        assert_eq!(h.version, 3);
        assert_eq!(h.base_static_mem, 0x0400);
        assert_eq!(h.initial_pc, 0x0040);
        assert_eq!(h.file_length, 0x0200 * 2);
    }

    #[test]
    fn file_length_scales_by_version() {
        assert_eq!(file_length_multiplier(3), 2);
        assert_eq!(file_length_multiplier(5), 4);
        assert_eq!(file_length_multiplier(8), 8);
    }

    #[test]
    fn capability_flags_reflect_config_disables() {
        let mut bytes = sample_header(4);
        let header = Header::new(&bytes).unwrap();
        let mut config = crate::config::Config::default();
        config.disable_color = true;
        config.disable_timed = true;
        config.int_number = 6;

        header.apply_capability_flags(&mut bytes, &config);
        assert_eq!(bytes[0x01] & 0x01, 0); // colour cleared
        assert_eq!(bytes[0x01] & 0x80, 0); // timed input cleared
        assert_eq!(bytes[0x1E], 6);
    }

    #[test]
    fn rejects_out_of_range_static_start() {
        let mut bytes = sample_header(3);
        bytes[0x0E] = 0x00;
        bytes[0x0F] = 0x10; // static start = 16, below the required 64 minimum
        assert!(Header::new(&bytes).is_err());
    }
}
