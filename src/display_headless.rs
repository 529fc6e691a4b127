//! Headless I/O port for testing and CI environments.
//!
//! Collects all output without displaying it and answers input from a
//! scripted queue instead of a real keyboard, useful for automated testing
//! and non-interactive environments.

use crate::display_trait::{CharInput, DisplayError, LineInput, TimerCallback, ZMachineDisplay};
use log::debug;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct HeadlessDisplay {
    buffer: Vec<String>,
    current_line: String,
    cursor: (u16, u16),
    upper_window_lines: u16,
    current_window: u8,
    terminal_width: u16,
    terminal_height: u16,
    text_style: u16,
    colour: (i16, i16),
    input_queue: VecDeque<String>,
    active_input_stream: u16,
    saved_blob: Option<Vec<u8>>,
}

impl HeadlessDisplay {
    pub fn new() -> Result<Self, DisplayError> {
        Ok(Self {
            buffer: Vec::new(),
            current_line: String::new(),
            cursor: (1, 1),
            upper_window_lines: 0,
            current_window: 0,
            terminal_width: 80,
            terminal_height: 24,
            text_style: 0,
            colour: (9, 9), // "default" per the Standard's colour table
            input_queue: VecDeque::new(),
            active_input_stream: 0,
            saved_blob: None,
        })
    }

    /// Get the current buffer content (for testing)
    pub fn get_buffer(&self) -> &[String] {
        &self.buffer
    }

    /// Get all output as a single string
    pub fn get_output(&self) -> String {
        let mut output = self.buffer.join("\n");
        if !self.current_line.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&self.current_line);
        }
        output
    }

    /// Queues a scripted line of input for a future `get_line` call.
    pub fn push_input_line(&mut self, line: impl Into<String>) {
        self.input_queue.push_back(line.into());
    }

    /// Directly inspects the last blob handed to [`save_blob_write`], for
    /// tests that want to check a save round-tripped without a real
    /// filesystem.
    pub fn last_saved_blob(&self) -> Option<&[u8]> {
        self.saved_blob.as_deref()
    }

    /// Flush the current line to the buffer
    fn flush_line(&mut self) {
        if !self.current_line.is_empty() || self.buffer.is_empty() {
            self.buffer.push(self.current_line.clone());
            self.current_line.clear();
        }
    }
}

impl ZMachineDisplay for HeadlessDisplay {
    fn clear_screen(&mut self) -> Result<(), DisplayError> {
        self.buffer.clear();
        self.current_line.clear();
        Ok(())
    }

    fn split_window(&mut self, lines: u16) -> Result<(), DisplayError> {
        debug!("Headless: split_window({})", lines);
        self.upper_window_lines = lines;
        Ok(())
    }

    fn set_window(&mut self, window: u8) -> Result<(), DisplayError> {
        debug!("Headless: set_window({})", window);
        self.current_window = window;
        Ok(())
    }

    fn set_cursor(&mut self, line: u16, column: u16) -> Result<(), DisplayError> {
        debug!("Headless: set_cursor({}, {})", line, column);
        self.cursor = (line, column);
        Ok(())
    }

    fn print(&mut self, text: &str) -> Result<(), DisplayError> {
        if !text.contains('\n') {
            self.current_line.push_str(text);
        } else {
            let lines: Vec<&str> = text.split('\n').collect();
            for (i, line) in lines.iter().enumerate() {
                self.current_line.push_str(line);
                if i < lines.len() - 1 {
                    self.flush_line();
                }
            }
        }
        Ok(())
    }

    fn print_char(&mut self, ch: char) -> Result<(), DisplayError> {
        if ch == '\n' {
            self.flush_line();
        } else {
            self.current_line.push(ch);
        }
        Ok(())
    }

    fn erase_window(&mut self, _window: i16) -> Result<(), DisplayError> {
        self.buffer.clear();
        self.current_line.clear();
        Ok(())
    }

    fn show_status(&mut self, location: &str, score: i16, moves: u16) -> Result<(), DisplayError> {
        let status = format!("{} Score: {} Moves: {}", location, score, moves);
        self.buffer.push(format!("[STATUS: {}]", status));
        Ok(())
    }

    fn handle_resize(&mut self, width: u16, height: u16) {
        self.terminal_width = width;
        self.terminal_height = height;
    }

    fn erase_line(&mut self) -> Result<(), DisplayError> {
        self.buffer.push("[ERASE_LINE]".to_string());
        Ok(())
    }

    fn get_cursor(&mut self) -> Result<(u16, u16), DisplayError> {
        Ok(self.cursor)
    }

    fn set_buffer_mode(&mut self, _buffered: bool) -> Result<(), DisplayError> {
        Ok(())
    }

    fn set_text_style(&mut self, style: u16) -> Result<(), DisplayError> {
        debug!("Headless: set_text_style({})", style);
        self.text_style = style;
        Ok(())
    }

    fn set_colour(&mut self, foreground: i16, background: i16) -> Result<(), DisplayError> {
        debug!("Headless: set_colour({}, {})", foreground, background);
        self.colour = (foreground, background);
        Ok(())
    }

    fn get_line(
        &mut self,
        max_len: usize,
        _timeout_tenths: u16,
        _timer: &mut TimerCallback,
    ) -> Result<LineInput, DisplayError> {
        let mut text = self.input_queue.pop_front().unwrap_or_default();
        text.truncate(max_len);
        self.print_input_echo(&text)?;
        Ok(LineInput {
            text,
            terminator: 13,
            timed_out: false,
        })
    }

    fn get_char(
        &mut self,
        _timeout_tenths: u16,
        _timer: &mut TimerCallback,
    ) -> Result<CharInput, DisplayError> {
        let zscii = self
            .input_queue
            .front_mut()
            .filter(|line| !line.is_empty())
            .map(|line| {
                let ch = line.remove(0);
                if line.is_empty() {
                    self.input_queue.pop_front();
                }
                ch as u16
            })
            .unwrap_or(0);
        Ok(CharInput {
            zscii,
            timed_out: false,
        })
    }

    fn output_stream(&mut self, stream: i16, _table_addr: Option<u16>) -> Result<(), DisplayError> {
        debug!("Headless: output_stream({})", stream);
        Ok(())
    }

    fn input_stream(&mut self, stream: u16) -> Result<(), DisplayError> {
        debug!("Headless: input_stream({})", stream);
        self.active_input_stream = stream;
        Ok(())
    }

    fn save_blob_write(&mut self, bytes: &[u8]) -> Result<(), DisplayError> {
        self.saved_blob = Some(bytes.to_vec());
        Ok(())
    }

    fn save_blob_read(&mut self) -> Result<Vec<u8>, DisplayError> {
        self.saved_blob
            .clone()
            .ok_or_else(|| DisplayError::new("no save available"))
    }

    fn get_terminal_size(&self) -> (u16, u16) {
        (self.terminal_width, self.terminal_height)
    }

    fn force_refresh(&mut self) -> Result<(), DisplayError> {
        self.flush_line();
        Ok(())
    }
}

impl Drop for HeadlessDisplay {
    fn drop(&mut self) {
        self.flush_line();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_timer() -> impl FnMut() -> Result<bool, DisplayError> {
        || Ok(false)
    }

    #[test]
    fn print_flushes_on_embedded_newline() {
        let mut display = HeadlessDisplay::new().unwrap();
        display.print("hello\nworld").unwrap();
        assert_eq!(display.get_buffer(), &["hello".to_string()]);
        assert_eq!(display.get_output(), "hello\nworld");
    }

    #[test]
    fn get_line_pulls_from_scripted_queue() {
        let mut display = HeadlessDisplay::new().unwrap();
        display.push_input_line("open mailbox");
        let mut timer = no_timer();
        let result = display.get_line(80, 0, &mut timer).unwrap();
        assert_eq!(result.text, "open mailbox");
        assert_eq!(result.terminator, 13);
        assert!(!result.timed_out);
    }

    #[test]
    fn get_char_consumes_one_character_at_a_time() {
        let mut display = HeadlessDisplay::new().unwrap();
        display.push_input_line("ab");
        let mut timer = no_timer();
        let first = display.get_char(0, &mut timer).unwrap();
        let second = display.get_char(0, &mut timer).unwrap();
        assert_eq!(first.zscii, b'a' as u16);
        assert_eq!(second.zscii, b'b' as u16);
    }

    #[test]
    fn save_blob_round_trips() {
        let mut display = HeadlessDisplay::new().unwrap();
        display.save_blob_write(&[1, 2, 3]).unwrap();
        assert_eq!(display.save_blob_read().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn save_blob_read_fails_when_empty() {
        let mut display = HeadlessDisplay::new().unwrap();
        assert!(display.save_blob_read().is_err());
    }
}
