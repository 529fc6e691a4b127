//! ZSCII/Z-character text codec, per §4.2.
//!
//! Z-strings are sequences of 16-bit words, each packing three 5-bit
//! Z-characters; the high bit of the last word in a string marks its end.
//! Z-characters map to ZSCII through one of three 26-entry alphabets, which
//! a story can override via the header's alphabet table address (v5+).

use crate::header::Header;
use log::{debug, warn};

const DEFAULT_A0: [char; 26] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z',
];
const DEFAULT_A1: [char; 26] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S',
    'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];
// Slot 0 (zc=6) is the 10-bit ZSCII escape, slot 1 (zc=7) is newline; both
// handled specially and never indexed into this table. (v3+; see
// DEFAULT_V1_A2 below for v1, which has neither slot reserved.)
const DEFAULT_A2: [char; 26] = [
    ' ', '\n', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '.', ',', '!', '?', '_', '#',
    '\'', '"', '/', '\\', '-', ':', '(', ')',
];

// v1 has no 10-bit ZSCII escape and gets its newline from top-level Z-char 1
// (see decode_string_recursive), so A2 reserves neither slot: both are real
// characters, with an extra '<' taking the escape slot's place.
const DEFAULT_V1_A2: [char; 26] = [
    ' ', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', '.', ',', '!', '?', '_', '#', '\'',
    '"', '/', '\\', '<', '-', ':', '(', ')',
];

type AlphabetSet = [[char; 26]; 3];

fn default_alphabets() -> AlphabetSet {
    [DEFAULT_A0, DEFAULT_A1, DEFAULT_A2]
}

fn default_alphabets_for_version(version: u8) -> AlphabetSet {
    if version == 1 {
        [DEFAULT_A0, DEFAULT_A1, DEFAULT_V1_A2]
    } else {
        default_alphabets()
    }
}

/// Reads a story's custom alphabet table (v5+, header byte 0x34), if any.
pub fn alphabet_override_from_header(memory: &[u8], header: &Header) -> Option<AlphabetSet> {
    if header.alphabet_table == 0 {
        return None;
    }
    let base = header.alphabet_table;
    if base + 78 > memory.len() {
        warn!("alphabet table address {base:#06x} runs past end of memory, ignoring override");
        return None;
    }
    let mut set = default_alphabets();
    for (alphabet_idx, alphabet) in set.iter_mut().enumerate() {
        for (i, slot) in alphabet.iter_mut().enumerate() {
            *slot = memory[base + alphabet_idx * 26 + i] as char;
        }
    }
    Some(set)
}

/// Reads a story's custom Unicode translation table, if declared.
pub fn unicode_table_from_header(memory: &[u8], header: &Header) -> Option<Vec<char>> {
    let addr = header.unicode_table_addr(memory);
    if addr == 0 || addr >= memory.len() {
        return None;
    }
    let count = memory[addr] as usize;
    let mut table = Vec::with_capacity(count);
    for i in 0..count {
        let word_addr = addr + 1 + i * 2;
        if word_addr + 1 >= memory.len() {
            break;
        }
        let code = ((memory[word_addr] as u32) << 8) | memory[word_addr + 1] as u32;
        table.push(char::from_u32(code).unwrap_or('?'));
    }
    Some(table)
}

/// ZSCII code 155 is the first of the 69-entry default extra-characters
/// block (Standard §3.8.5.3); it's used when no custom table is declared.
const DEFAULT_UNICODE_EXTRAS: &str = "\u{e4}\u{f6}\u{fc}\u{c4}\u{d6}\u{dc}\u{df}\u{bb}\u{ab}\u{eb}\u{ef}\u{ff}\u{cb}\u{cf}\u{e1}\u{e9}\u{ed}\u{f3}\u{fa}\u{fd}\u{c1}\u{c9}\u{cd}\u{d3}\u{da}\u{dd}\u{e0}\u{e8}\u{ec}\u{f2}\u{f9}\u{c0}\u{c8}\u{cc}\u{d2}\u{d9}\u{e2}\u{ea}\u{ee}\u{f4}\u{fb}\u{c2}\u{ca}\u{ce}\u{d4}\u{db}\u{e5}\u{c5}\u{f8}\u{d8}\u{e3}\u{f1}\u{f5}\u{c3}\u{d1}\u{d5}\u{e6}\u{c6}\u{e7}\u{c7}\u{fe}\u{f0}\u{de}\u{d0}\u{a3}\u{153}\u{152}\u{a1}\u{bf}";

pub(crate) fn zscii_to_unicode(code: u16, custom_table: Option<&[char]>) -> char {
    match code {
        0 => '\0',
        9 => '\t',
        11 => ' ',
        13 => '\n',
        32..=126 => code as u8 as char,
        155..=223 if custom_table.is_none() => {
            let index = (code - 155) as usize;
            DEFAULT_UNICODE_EXTRAS.chars().nth(index).unwrap_or('?')
        }
        // A custom v5+ table may use the full 155..=251 range (Standard
        // §3.8.5.3's 252-entry mapping), not just the default's 69 entries.
        155..=251 if custom_table.is_some() => {
            let index = (code - 155) as usize;
            *custom_table.unwrap().get(index).unwrap_or(&'?')
        }
        _ => '?',
    }
}

/// Decodes a Z-string starting at `addr`. Returns the decoded text and the
/// number of bytes consumed (always a multiple of 2).
///
/// `version` selects v1's shift-lock behavior versus v3+'s temporary shifts;
/// `alphabet_override` replaces the default A0/A1/A2 tables when present.
pub fn decode_string(
    memory: &[u8],
    addr: usize,
    abbrev_table_addr: usize,
    version: u8,
    alphabet_override: Option<AlphabetSet>,
) -> Result<(String, usize), String> {
    decode_string_recursive(
        memory,
        addr,
        abbrev_table_addr,
        version,
        alphabet_override,
        None,
        0,
    )
}

/// Decodes a string using a story's declared Unicode translation table
/// instead of the default extra-characters block.
pub fn decode_string_with_unicode_table(
    memory: &[u8],
    addr: usize,
    abbrev_table_addr: usize,
    version: u8,
    alphabet_override: Option<AlphabetSet>,
    unicode_table: Option<&[char]>,
) -> Result<(String, usize), String> {
    decode_string_recursive(
        memory,
        addr,
        abbrev_table_addr,
        version,
        alphabet_override,
        unicode_table,
        0,
    )
}

const MAX_ABBREV_DEPTH: u8 = 1;
const MAX_STRING_WORDS: usize = 2000;

fn decode_string_recursive(
    memory: &[u8],
    addr: usize,
    abbrev_table_addr: usize,
    version: u8,
    alphabet_override: Option<AlphabetSet>,
    unicode_table: Option<&[char]>,
    depth: u8,
) -> Result<(String, usize), String> {
    if depth > MAX_ABBREV_DEPTH {
        return Err("abbreviation referenced an abbreviation (nesting is illegal)".to_string());
    }

    let alphabets = alphabet_override.unwrap_or_else(|| default_alphabets_for_version(version));

    let mut offset = addr;
    let mut all_zchars = Vec::new();
    let mut is_end = false;

    while !is_end && offset + 1 < memory.len() && all_zchars.len() / 3 < MAX_STRING_WORDS {
        let word = ((memory[offset] as u16) << 8) | memory[offset + 1] as u16;
        offset += 2;
        is_end = word & 0x8000 != 0;
        all_zchars.push(((word >> 10) & 0x1F) as u8);
        all_zchars.push(((word >> 5) & 0x1F) as u8);
        all_zchars.push((word & 0x1F) as u8);
    }
    if !is_end {
        return Err(format!("unterminated Z-string at address {addr:#06x}"));
    }

    let mut result = String::new();
    let mut abbrev_shift: u8 = 0;
    let mut current_alphabet: usize = 0;
    // v1/v2 shift is sticky (shift-lock) until explicitly changed back;
    // v3+ shifts apply to the next character only.
    let shift_is_lock = version <= 2;
    let mut locked_alphabet: usize = 0;

    let mut i = 0;
    while i < all_zchars.len() {
        let zc = all_zchars[i];
        i += 1;

        if abbrev_shift > 0 {
            let abbrev_num = (abbrev_shift - 1) as usize * 32 + zc as usize;
            let entry_addr = abbrev_table_addr + abbrev_num * 2;
            abbrev_shift = 0;
            if entry_addr + 1 >= memory.len() {
                return Err(format!("abbreviation table entry {abbrev_num} out of bounds"));
            }
            let word_addr = ((memory[entry_addr] as u16) << 8) | memory[entry_addr + 1] as u16;
            let byte_addr = word_addr as usize * 2;
            let (abbrev_str, _) = decode_string_recursive(
                memory,
                byte_addr,
                abbrev_table_addr,
                version,
                Some(alphabets),
                unicode_table,
                depth + 1,
            )?;
            result.push_str(&abbrev_str);
            continue;
        }

        match zc {
            0 => {
                result.push(' ');
                current_alphabet = locked_alphabet;
            }
            1 if version == 1 => {
                result.push('\n');
                current_alphabet = locked_alphabet;
            }
            2 | 3 if version <= 2 => {
                // v1/v2: these slots are temporary shifts, not abbreviations
                // (abbreviations only claim Z-chars 2/3 from v3 onward).
                current_alphabet = if zc == 2 { 1 } else { 2 };
            }
            1..=3 => {
                abbrev_shift = zc;
            }
            4 => {
                current_alphabet = 1;
                if shift_is_lock {
                    locked_alphabet = 1;
                }
            }
            5 => {
                current_alphabet = 2;
                if shift_is_lock {
                    locked_alphabet = 2;
                }
            }
            6..=31 => {
                let idx = (zc - 6) as usize;
                if version >= 2 && current_alphabet == 2 && zc == 6 {
                    if i + 1 >= all_zchars.len() {
                        return Err("truncated 10-bit ZSCII escape".to_string());
                    }
                    let high = all_zchars[i];
                    let low = all_zchars[i + 1];
                    i += 2;
                    let code = ((high as u16) << 5) | low as u16;
                    result.push(zscii_to_unicode(code, unicode_table));
                } else if version >= 2 && current_alphabet == 2 && zc == 7 {
                    result.push('\n');
                } else {
                    result.push(alphabets[current_alphabet][idx]);
                }
                current_alphabet = locked_alphabet;
            }
            _ => unreachable!("5-bit Z-character out of range"),
        }
    }

    debug!("decoded {} bytes at {addr:#06x} into {} chars", offset - addr, result.chars().count());
    Ok((result, offset - addr))
}

/// Inverse of [`zscii_to_unicode`] for the default extra-characters block.
/// Unsupported scalars fall back to `?` (ZSCII 63), matching the codec's
/// decode-side fallback.
fn unicode_to_zscii(ch: char) -> u16 {
    match ch {
        ' '..='~' => ch as u16,
        _ => DEFAULT_UNICODE_EXTRAS
            .chars()
            .position(|c| c == ch)
            .map(|pos| 155 + pos as u16)
            .unwrap_or(63),
    }
}

/// Reverse of the alphabet tables: char -> (alphabet index, Z-char 6..31).
/// Earlier alphabets win on overlap (there shouldn't be any in practice).
fn alphabet_reverse_map(alphabets: &AlphabetSet) -> std::collections::HashMap<char, (usize, u8)> {
    let mut map = std::collections::HashMap::new();
    for (alpha_idx, table) in alphabets.iter().enumerate() {
        for (i, &ch) in table.iter().enumerate() {
            map.entry(ch).or_insert((alpha_idx, (i + 6) as u8));
        }
    }
    map
}

/// Encodes `text` into the Z-character stream (before packing into words),
/// per §4.2 "Encoding". Mirrors [`decode_string_recursive`]'s shift handling:
/// v1-2 shifts lock until changed back, v3+ shifts apply to the next
/// character only. Characters outside all three alphabets fall back to the
/// 10-bit ZSCII escape in A2.
fn encode_zchars(text: &str, version: u8, alphabets: &AlphabetSet) -> Vec<u8> {
    let reverse = alphabet_reverse_map(alphabets);
    let mut zchars = Vec::new();
    let mut locked_alphabet = 0usize;
    let shift_is_lock = version <= 2;

    for ch in text.chars() {
        let current_alphabet = locked_alphabet;
        if ch == ' ' {
            zchars.push(0);
            continue;
        }
        if ch == '\n' {
            if current_alphabet != 2 {
                zchars.push(5);
                if shift_is_lock {
                    locked_alphabet = 2;
                }
            }
            zchars.push(7);
            continue;
        }
        if let Some(&(alpha, zc)) = reverse.get(&ch) {
            if alpha != current_alphabet {
                zchars.push(if alpha == 1 { 4 } else { 5 });
                if shift_is_lock {
                    locked_alphabet = alpha;
                }
            }
            zchars.push(zc);
        } else {
            if current_alphabet != 2 {
                zchars.push(5);
                if shift_is_lock {
                    locked_alphabet = 2;
                }
            }
            let code = unicode_to_zscii(ch);
            zchars.push(6);
            zchars.push(((code >> 5) & 0x1F) as u8);
            zchars.push((code & 0x1F) as u8);
        }
    }
    zchars
}

/// Encodes `text` into a packed Z-string: 2 words (v1-3) or 3 words (v4+),
/// the reverse of [`decode_string`]. Used for dictionary lookup (§4.2
/// "Encoding"). Longer input is truncated to the word count; shorter input
/// is padded with Z-char 5.
pub fn encode_string(text: &str, version: u8, alphabet_override: Option<AlphabetSet>) -> Vec<u16> {
    let alphabets = alphabet_override.unwrap_or_else(|| default_alphabets_for_version(version));
    let num_zchars = if version <= 3 { 6 } else { 9 };

    let mut zchars = encode_zchars(text, version, &alphabets);
    zchars.truncate(num_zchars);
    zchars.resize(num_zchars, 5);

    let last_word = num_zchars / 3 - 1;
    zchars
        .chunks(3)
        .enumerate()
        .map(|(i, c)| {
            let word = ((c[0] as u16) << 10) | ((c[1] as u16) << 5) | c[2] as u16;
            if i == last_word {
                word | 0x8000
            } else {
                word
            }
        })
        .collect()
}

/// Decodes a string at a packed address (routine/string address space).
pub fn decode_string_at_packed_addr(
    memory: &[u8],
    packed_addr: u16,
    header: &Header,
    unicode_table: Option<&[char]>,
) -> Result<String, String> {
    let byte_addr = header.unpack_string(packed_addr);
    let alphabets = alphabet_override_from_header(memory, header);
    let (string, _) = decode_string_with_unicode_table(
        memory,
        byte_addr,
        header.abbrev_table,
        header.version,
        alphabets,
        unicode_table,
    )?;
    Ok(string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;

    fn v3_header() -> Header {
        let mut bytes = vec![0u8; 0x40];
        bytes[0] = 3;
        bytes[0x0E] = 0x00;
        bytes[0x0F] = 0x40; // static mem base 0x40
        Header::new(&bytes).unwrap()
    }

    #[test]
    fn decodes_simple_word() {
        let mut memory = vec![0u8; 100];
        // "hello": h=8,e=5,l=12,l=12,o=15 (+6 offset = 14,11,18,18,21)
        memory[10] = 0x72;
        memory[11] = 0xE4;
        memory[12] = 0x95;
        memory[13] = 0x45;

        let (result, len) = decode_string(&memory, 10, 0, 3, None).unwrap();
        assert_eq!(result, "hello");
        assert_eq!(len, 4);
    }

    #[test]
    fn decodes_space_and_shift() {
        let mut memory = vec![0u8; 100];
        // "a b": a=7->13, space=0, b=8->14
        memory[20] = 0xB4;
        memory[21] = 0x0E;

        let (result, len) = decode_string(&memory, 20, 0, 3, None).unwrap();
        assert_eq!(result, "a b");
        assert_eq!(len, 2);
    }

    #[test]
    fn rejects_nested_abbreviations() {
        let header = v3_header();
        let _ = header;
        // An abbreviation string that itself references an abbreviation
        // must fail rather than recurse indefinitely; verified via the
        // depth guard directly since constructing the byte layout for two
        // nested abbreviation tables is otherwise verbose.
        let result = decode_string_recursive(&[0, 0], 0, 0, 3, None, None, MAX_ABBREV_DEPTH + 1);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unterminated_string() {
        let memory = vec![0u8; 4]; // no high bit ever set
        assert!(decode_string(&memory, 0, 0, 3, None).is_err());
    }

    #[test]
    fn encode_then_decode_round_trips_a_simple_word() {
        let words = encode_string("go", 3, None);
        assert_eq!(words.len(), 2);
        let mut memory = vec![0u8; 4];
        memory[0..2].copy_from_slice(&words[0].to_be_bytes());
        memory[2..4].copy_from_slice(&words[1].to_be_bytes());

        let (decoded, len) = decode_string(&memory, 0, 0, 3, None).unwrap();
        assert_eq!(decoded.trim_end(), "go");
        assert_eq!(len, 4);
    }

    #[test]
    fn encode_handles_mixed_case_and_digits() {
        let words = encode_string("Room42", 5, None);
        assert_eq!(words.len(), 3);
        let mut memory = vec![0u8; 6];
        for (i, w) in words.iter().enumerate() {
            memory[i * 2..i * 2 + 2].copy_from_slice(&w.to_be_bytes());
        }
        let (decoded, _) = decode_string(&memory, 0, 0, 5, None).unwrap();
        assert!(decoded.starts_with("Room42"));
    }

    #[test]
    fn v1_uses_zchars_2_3_as_temporary_shifts_not_abbreviations() {
        let mut memory = vec![0u8; 100];
        // Z-chars: 2 (shift A1), 'X' (A1 idx 23 -> zc 29), 0 (space)
        // word = 0b0_00010_11101_00000, high bit set to terminate.
        let word: u16 = (2u16 << 10) | (29 << 5) | 0;
        memory[30..32].copy_from_slice(&(word | 0x8000).to_be_bytes());

        let (result, _) = decode_string(&memory, 30, 0, 1, None).unwrap();
        assert_eq!(result, "X ");
    }

    #[test]
    fn encode_pads_short_words_with_shift_to_a2() {
        let words = encode_string("a", 3, None);
        // 1 real Z-char + 5 padding Z-chars of value 5.
        assert_eq!(words[1] & 0x8000, 0x8000);
    }

    #[test]
    fn zscii_to_unicode_uses_custom_table_past_default_extras_range() {
        // A custom v5+ Unicode table may populate ZSCII 224..=251, past the
        // default 69-entry extras block's 155..=223 span.
        let mut custom = vec!['?'; 97];
        custom[224 - 155] = '\u{2014}'; // em dash
        assert_eq!(zscii_to_unicode(224, Some(&custom)), '\u{2014}');
        assert_eq!(zscii_to_unicode(251, Some(&custom)), '?');
    }

    #[test]
    fn zscii_to_unicode_falls_back_to_default_extras_without_custom_table() {
        assert_eq!(zscii_to_unicode(155, None), '\u{e4}');
    }

    #[test]
    fn v1_a2_has_no_reserved_escape_or_newline_slots() {
        let mut memory = vec![0u8; 100];
        // Z-chars: 5 (shift A2), 6, 0 -- in v2+ this would be a 10-bit ZSCII
        // escape introducer; in v1, A2 index 0 (zc=6) is an ordinary space.
        let word: u16 = (5u16 << 10) | (6 << 5) | 0;
        memory[40..42].copy_from_slice(&(word | 0x8000).to_be_bytes());

        let (result, _) = decode_string(&memory, 40, 0, 1, None).unwrap();
        assert_eq!(result, "  ");
    }
}
