// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Human-readable duration parsing for service configuration.
//!
//! Accepts strings like `"30m"`, `"2h"`, `"1d12h"` and raw seconds
//! (`"3600"`) for backward compatibility, returning `std::time::Duration`.

use std::fmt;
use std::time::Duration;

/// Error type for duration parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDurationError {
    input: String,
    reason: String,
}

impl ParseDurationError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ParseDurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid duration '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for ParseDurationError {}

/// Parse a human-readable duration string.
///
/// Supported units: `d` (days), `h` (hours), `m` (minutes), `s` (seconds).
/// Units may be combined (`"1h30m"`). A bare integer is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(ParseDurationError::new(input, "empty string"));
    }

    // Bare seconds first (backward compatibility)
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut num = String::new();

    for c in input.chars() {
        if c.is_ascii_digit() {
            num.push(c);
        } else if c.is_ascii_alphabetic() {
            if num.is_empty() {
                return Err(ParseDurationError::new(
                    input,
                    format!("expected number before '{c}'"),
                ));
            }
            let n: u64 = num
                .parse()
                .map_err(|_| ParseDurationError::new(input, format!("invalid number '{num}'")))?;
            num.clear();

            let mult = match c.to_ascii_lowercase() {
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => {
                    return Err(ParseDurationError::new(
                        input,
                        format!("unknown unit '{c}' (supported: d, h, m, s)"),
                    ));
                }
            };

            total = n
                .checked_mul(mult)
                .and_then(|part| total.checked_add(part))
                .ok_or_else(|| ParseDurationError::new(input, "duration overflow"))?;
        } else if !c.is_whitespace() {
            return Err(ParseDurationError::new(
                input,
                format!("unexpected character '{c}'"),
            ));
        }
    }

    if !num.is_empty() {
        return Err(ParseDurationError::new(
            input,
            format!("number '{num}' missing unit (use d, h, m or s)"),
        ));
    }

    Ok(Duration::from_secs(total))
}

/// Read a duration from an environment variable, falling back to `default`
/// when the variable is unset or unparsable.
pub fn env_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| parse_duration(&s).ok())
        .unwrap_or(default)
}
