//! The I/O port: the narrow interface the core consumes for everything
//! outside its own walls, per §6. Windowing, fonts, colors, input editing,
//! and the concrete terminal/GUI backend are all out of scope for the core;
//! this trait is the seam an embedding program implements to supply them.

use std::fmt;

/// Result of a line read (`@sread`/`@aread`).
#[derive(Debug, Clone, Default)]
pub struct LineInput {
    pub text: String,
    /// ZSCII code of the key that ended input (13 for return, or a
    /// story-declared terminating character in v5+).
    pub terminator: u8,
    pub timed_out: bool,
}

/// Result of a single-character read (`@read_char`).
#[derive(Debug, Clone, Copy, Default)]
pub struct CharInput {
    pub zscii: u16,
    pub timed_out: bool,
}

/// Callback the I/O port invokes at most once per `timeout` tenths of a
/// second while blocked on input. Returning `Ok(true)` means the interrupt
/// routine it ran wants to abort the read (per §4.4/§5: interrupt routines
/// are re-entered via the direct-call path and can signal this).
pub type TimerCallback<'a> = dyn FnMut() -> Result<bool, DisplayError> + 'a;

/// The full I/O port a Z-machine core consumes: output, input, stream
/// routing, and save-blob transfer. Concrete backends (terminal, headless,
/// web) implement this; the core never assumes one.
pub trait ZMachineDisplay {
    /// Clear the entire screen
    fn clear_screen(&mut self) -> Result<(), DisplayError>;

    /// Split the screen into upper and lower windows
    /// In v3: creates a status line
    /// In v4+: creates a multi-line upper window
    fn split_window(&mut self, lines: u16) -> Result<(), DisplayError>;

    /// Set the current window (0 = lower/main, 1 = upper)
    fn set_window(&mut self, window: u8) -> Result<(), DisplayError>;

    /// Set cursor position (1-based coordinates)
    /// In v3: typically only used for upper window
    /// In v4+: can be used for any window
    fn set_cursor(&mut self, line: u16, column: u16) -> Result<(), DisplayError>;

    /// Print text to the current window
    fn print(&mut self, text: &str) -> Result<(), DisplayError>;

    /// Print a single character to the current window
    fn print_char(&mut self, ch: char) -> Result<(), DisplayError>;

    /// Emit one Unicode scalar to the currently active output streams
    /// (`@print_unicode`). Default just routes through `print_char`; a
    /// backend only needs to override this if streams 2-4 (transcript,
    /// memory table, command record) need separate Unicode handling.
    fn put_unicode(&mut self, ch: char) -> Result<(), DisplayError> {
        self.print_char(ch)
    }

    /// Erase a window (-1 = whole screen, 0 = lower, 1 = upper)
    fn erase_window(&mut self, window: i16) -> Result<(), DisplayError>;

    /// Handle terminal resize
    fn handle_resize(&mut self, width: u16, height: u16);

    // V3-specific operations (no-op for v4+)

    /// Show status line (v3 only)
    /// For v4+, this should be a no-op as games manage their own status
    fn show_status(&mut self, location: &str, score: i16, moves: u16) -> Result<(), DisplayError>;

    // V4+ specific operations (no-op or error for v3)

    /// Erase from cursor to end of line (v4+)
    fn erase_line(&mut self) -> Result<(), DisplayError>;

    /// Get current cursor position (v4+)
    /// Returns (line, column) with 1-based indexing
    fn get_cursor(&mut self) -> Result<(u16, u16), DisplayError>;

    /// Set buffer mode (v4+)
    fn set_buffer_mode(&mut self, buffered: bool) -> Result<(), DisplayError>;

    /// Set text style (0 = normal, 1 = reverse, 2 = bold, 4 = italic, 8 = fixed)
    /// Multiple styles can be combined with bitwise OR
    fn set_text_style(&mut self, style: u16) -> Result<(), DisplayError>;

    /// Set foreground/background colour (v5+). Colour codes follow the
    /// Standard's palette (2 = black .. 9 = default); a backend without
    /// colour support can simply ignore the call.
    fn set_colour(&mut self, foreground: i16, background: i16) -> Result<(), DisplayError> {
        let _ = (foreground, background);
        Ok(())
    }

    /// Print input echo immediately (for real-time feedback during input)
    fn print_input_echo(&mut self, text: &str) -> Result<(), DisplayError> {
        // Default implementation just calls print
        self.print(text)
    }

    // ---- Input -------------------------------------------------------------

    /// Reads a line (`@sread`/`@aread`), honoring an optional timer callback
    /// invoked roughly every `timeout` tenths of a second. `timeout` of 0
    /// means no timeout.
    fn get_line(
        &mut self,
        max_len: usize,
        timeout_tenths: u16,
        timer: &mut TimerCallback,
    ) -> Result<LineInput, DisplayError>;

    /// Reads a single ZSCII input character (`@read_char`), with the same
    /// timer contract as [`get_line`](Self::get_line).
    fn get_char(
        &mut self,
        timeout_tenths: u16,
        timer: &mut TimerCallback,
    ) -> Result<CharInput, DisplayError>;

    // ---- Streams and save transfer ------------------------------------------

    /// Activates/deactivates an output stream. Stream 1 (screen) is
    /// implicit; streams 2 (transcript) and 4 (command record) are toggled
    /// by sign; stream 3 (memory table) additionally takes a table address
    /// to redirect text into dynamic memory instead of the screen.
    fn output_stream(&mut self, stream: i16, table_addr: Option<u16>) -> Result<(), DisplayError>;

    /// Switches input stream (0 = keyboard, 1 = replay file).
    fn input_stream(&mut self, stream: u16) -> Result<(), DisplayError>;

    /// Optional; may no-op. (`@sound_effect`)
    fn sound_effect(
        &mut self,
        number: u16,
        effect: u16,
        volume_repeats: u16,
        routine: u16,
    ) -> Result<(), DisplayError> {
        let _ = (number, effect, volume_repeats, routine);
        Ok(())
    }

    /// Writes a completed Quetzal save image out through the port
    /// (`@save`/`@save_undo`'s external half). Folds
    /// open/write/close into one call since the core always hands over a
    /// complete in-memory byte buffer.
    fn save_blob_write(&mut self, bytes: &[u8]) -> Result<(), DisplayError>;

    /// Reads a complete Quetzal save image back in (`@restore`'s external
    /// half). Folds open/read/close into one call for the same reason.
    fn save_blob_read(&mut self) -> Result<Vec<u8>, DisplayError>;

    // Utility methods

    /// Get the current terminal dimensions
    fn get_terminal_size(&self) -> (u16, u16);

    /// Force a display refresh (mainly for debugging)
    fn force_refresh(&mut self) -> Result<(), DisplayError>;
}

/// Display error type
#[derive(Debug, Clone)]
pub struct DisplayError {
    pub message: String,
}

impl DisplayError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Display error: {}", self.message)
    }
}

impl std::error::Error for DisplayError {}

impl From<std::io::Error> for DisplayError {
    fn from(error: std::io::Error) -> Self {
        Self::new(format!("I/O error: {}", error))
    }
}

impl From<DisplayError> for String {
    fn from(error: DisplayError) -> String {
        error.message
    }
}
