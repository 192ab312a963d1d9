//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

#![allow(dead_code)]

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Validation error - invalid manifest or options
pub const VALIDATION_ERROR: i32 = 2;

/// Fetch error - one or more images or charts could not be downloaded
pub const FETCH_ERROR: i32 = 3;

/// Bundle error - archive or chart rewrite failure
pub const BUNDLE_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Push error - at least one artifact was not delivered
pub const PUSH_ERROR: i32 = 6;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
