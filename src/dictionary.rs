//! Dictionary lookup and lexical analysis (`sread`/`aread` word splitting),
//! version-aware per §4.2/§6.

use crate::text::encode_string;
use crate::vm::VM;
use log::debug;

/// Encodes a word into 6 Z-characters packed into two words (v1-3), via the
/// same alphabet-aware encoder used for printing (§4.2 "Encoding").
pub(crate) fn encode_word_v3(word: &str) -> (u16, u16) {
    let words = encode_string(word, 3, None);
    (words[0], words[1])
}

/// Encodes a word into 9 Z-characters packed into three words (v4+).
pub(crate) fn encode_word_v4_plus(word: &str) -> (u16, u16, u16) {
    let words = encode_string(word, 5, None);
    (words[0], words[1], words[2])
}

impl VM {
    /// Looks up a word in the dictionary, returning its byte address or 0.
    pub fn lookup_dictionary(&self, word: &str) -> u16 {
        if self.game.header.version <= 3 {
            self.lookup_dictionary_v3(word)
        } else {
            self.lookup_dictionary_v4_plus(word)
        }
    }

    fn dictionary_entries_addr(&self) -> (usize, u8, u16) {
        let dict_addr = self.game.header.dictionary;
        let sep_count = self.read_byte(dict_addr) as usize;
        let entry_start = dict_addr + 1 + sep_count;
        let entry_length = self.read_byte(entry_start);
        let entry_count = self.read_word(entry_start + 1);
        (entry_start + 3, entry_length, entry_count)
    }

    fn lookup_dictionary_v3(&self, word: &str) -> u16 {
        let (entries_addr, entry_length, entry_count) = self.dictionary_entries_addr();
        let (search1, search2) = encode_word_v3(word);

        let mut low: i32 = 0;
        let mut high: i32 = entry_count as i32 - 1;
        while low <= high {
            let mid = (low + high) / 2;
            let addr = entries_addr + mid as usize * entry_length as usize;
            let dict1 = self.read_word(addr);
            let dict2 = self.read_word(addr + 2);

            if (search1, search2) < (dict1, dict2) {
                high = mid - 1;
            } else if (search1, search2) > (dict1, dict2) {
                low = mid + 1;
            } else {
                debug!("dictionary: found '{word}' at {addr:#06x}");
                return addr as u16;
            }
        }
        0
    }

    fn lookup_dictionary_v4_plus(&self, word: &str) -> u16 {
        let (entries_addr, entry_length, entry_count) = self.dictionary_entries_addr();
        let search = encode_word_v4_plus(word);

        let mut low: i32 = 0;
        let mut high: i32 = entry_count as i32 - 1;
        while low <= high {
            let mid = (low + high) / 2;
            let addr = entries_addr + mid as usize * entry_length as usize;
            let dict = (
                self.read_word(addr),
                self.read_word(addr + 2),
                self.read_word(addr + 4),
            );

            if search < dict {
                high = mid - 1;
            } else if search > dict {
                low = mid + 1;
            } else {
                debug!("dictionary: found '{word}' at {addr:#06x}");
                return addr as u16;
            }
        }
        0
    }

    fn dictionary_separators(&self) -> Vec<char> {
        let dict_addr = self.game.header.dictionary;
        let sep_count = self.read_byte(dict_addr) as usize;
        (0..sep_count)
            .map(|i| self.read_byte(dict_addr + 1 + i) as char)
            .collect()
    }

    /// Tokenizes the text buffer and writes the result to the parse buffer
    /// (`sread`/`aread`'s lexer half). Word separators include whitespace
    /// and the dictionary's own separator characters, each of which also
    /// becomes its own token.
    pub fn parse_text(&mut self, text_buffer: usize, parse_buffer: usize) -> Result<(), String> {
        // v5+ buffers carry an explicit typed-length byte at offset 1; v3/4
        // buffers have no length byte and are simply zero-terminated.
        let (text_start, text_len) = if self.game.header.version >= 5 {
            (2usize, self.read_byte(text_buffer + 1) as usize)
        } else {
            let start = 1usize;
            let max = self.read_byte(text_buffer) as usize;
            let len = (0..max)
                .take_while(|&i| self.read_byte(text_buffer + start + i) != 0)
                .count();
            (start, len)
        };
        let text: String = (0..text_len)
            .map(|i| self.read_byte(text_buffer + text_start + i) as char)
            .collect();

        let separators = self.dictionary_separators();
        let tokens = tokenize(&text, &separators);

        let max_words = self.read_byte(parse_buffer) as usize;
        let word_count = tokens.len().min(max_words);
        self.write_byte(parse_buffer + 1, word_count as u8)?;

        for (i, (word, pos)) in tokens.iter().take(word_count).enumerate() {
            let dict_addr = self.lookup_dictionary(word);
            let entry_offset = parse_buffer + 2 + i * 4;
            self.write_word(entry_offset, dict_addr)?;
            self.write_byte(entry_offset + 2, word.chars().count() as u8)?;
            self.write_byte(entry_offset + 3, (*pos + text_start) as u8)?;
        }

        Ok(())
    }
}

/// Splits `text` into (word, byte_offset) tokens on whitespace and the
/// given separator characters, each separator becoming its own token.
fn tokenize(text: &str, separators: &[char]) -> Vec<(String, usize)> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_start = 0;
    let chars: Vec<char> = text.chars().collect();

    for (i, &ch) in chars.iter().enumerate() {
        if ch.is_whitespace() || separators.contains(&ch) {
            if !current.is_empty() {
                tokens.push((std::mem::take(&mut current), current_start));
            }
            if separators.contains(&ch) {
                tokens.push((ch.to_string(), i));
            }
        } else {
            if current.is_empty() {
                current_start = i;
            }
            current.push(ch);
        }
    }
    if !current.is_empty() {
        tokens.push((current, current_start));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_short_word_padded_with_spaces() {
        let (w1, w2) = encode_word_v3("go");
        // g=12, o=20, then four Z-char-5 (shift to A2) padding slots.
        assert_eq!(w1, (12u16 << 10) | (20 << 5) | 5);
        assert_eq!(w2, (5u16 << 10) | (5 << 5) | 5 | 0x8000);
    }

    #[test]
    fn tokenizes_separators_as_their_own_words() {
        let tokens = tokenize("go, north", &[',']);
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].0, "go");
        assert_eq!(tokens[1].0, ",");
        assert_eq!(tokens[2].0, "north");
    }
}
