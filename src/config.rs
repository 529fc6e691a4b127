//! Interpreter configuration.
//!
//! Consumed once at startup by the embedding program (command-line parsing,
//! RC-file loading, and the rest of the outer surface are out of scope for
//! the core, per the interpreter's external-interfaces contract). The core
//! only needs the resulting record.

use serde::Deserialize;

fn default_eval_stack_size() -> usize {
    1024
}

fn default_call_stack_size() -> usize {
    256
}

fn default_max_saves() -> usize {
    10
}

fn default_int_number() -> u8 {
    1
}

fn default_int_version() -> u8 {
    b'A'
}

/// Configuration consumed once at interpreter startup.
///
/// Mirrors the command-line/configuration surface: stack bounds, header
/// capability bits the embedding program wants cleared, interpreter
/// identification bytes, the undo ring size, and default stream filenames.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub eval_stack_size: usize,
    pub call_stack_size: usize,
    pub disable_color: bool,
    pub disable_timed: bool,
    pub disable_fixed: bool,
    pub disable_graphics_font: bool,
    pub disable_abbreviations: bool,
    /// 1-11, written to header byte 0x1E.
    pub int_number: u8,
    /// ASCII character, written to header byte 0x1F.
    pub int_version: u8,
    /// Forces a deterministic PRNG seed when present.
    pub random_seed: Option<u64>,
    /// Size of the in-memory undo ring.
    pub max_saves: usize,
    pub disable_undo_compression: bool,
    /// Sets the censorship bit in v3 Flags 1.
    pub enable_censorship: bool,
    pub transcript_name: Option<String>,
    pub script_name: Option<String>,
    pub replay_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            eval_stack_size: default_eval_stack_size(),
            call_stack_size: default_call_stack_size(),
            disable_color: false,
            disable_timed: false,
            disable_fixed: false,
            disable_graphics_font: false,
            disable_abbreviations: false,
            int_number: default_int_number(),
            int_version: default_int_version(),
            random_seed: None,
            max_saves: default_max_saves(),
            disable_undo_compression: false,
            enable_censorship: false,
            transcript_name: None,
            script_name: None,
            replay_name: None,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Config, String> {
        toml::from_str(s).map_err(|e| format!("invalid configuration: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_standard_bounds() {
        let cfg = Config::default();
        assert_eq!(cfg.eval_stack_size, 1024);
        assert_eq!(cfg.call_stack_size, 256);
        assert_eq!(cfg.max_saves, 10);
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let cfg = Config::from_toml_str("max_saves = 20\nenable_censorship = true\n").unwrap();
        assert_eq!(cfg.max_saves, 20);
        assert!(cfg.enable_censorship);
        assert_eq!(cfg.eval_stack_size, 1024);
    }
}
