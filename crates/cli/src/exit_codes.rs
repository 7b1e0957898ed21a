//! CLI Exit Code Registry
//!
//! This is the single source of truth for all `tally` exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain     | Description                                   |
//! |---------|------------|-----------------------------------------------|
//! | 0       | Universal  | Success                                       |
//! | 1       | recon      | Mismatches found (`--fail-on-mismatch`)       |
//! | 2       | Universal  | CLI usage error (bad args)                    |
//! | 60-69   | recon      | Config and runtime failures                   |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use tally_recon::ReconError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Usage error - bad arguments, missing required options.
/// clap exits with this code on its own.
#[allow(dead_code)]
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Recon (1, 60-69)
// =============================================================================

/// Mismatches found and `--fail-on-mismatch` was given.
/// Like `diff(1)`, exit 1 means "sides differ."
pub const EXIT_RECON_MISMATCH: u8 = 1;

/// Config could not be parsed or failed validation.
pub const EXIT_RECON_INVALID_CONFIG: u8 = 60;

/// IO or other runtime failure (unreadable config, missing CSV, unwritable output).
pub const EXIT_RECON_RUNTIME: u8 = 61;

/// Map a library error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_)
        | ReconError::ConfigValidation(_)
        | ReconError::InvalidDate { .. }
        | ReconError::InternalSourceAlreadySet { .. }
        | ReconError::InternalSourceMissing
        | ReconError::DuplicateSource(_) => EXIT_RECON_INVALID_CONFIG,
        ReconError::NotALeaf(_) | ReconError::Io(_) => EXIT_RECON_RUNTIME,
    }
}
