//! Duration text parsing and `HH:MM:SS` formatting.
//!
//! Durations are written as whitespace-separated `<integer><unit>` tokens,
//! e.g. `"10s"`, `"5m 30s"`, `"2h 10m"`, `"1d 3h"`. All tokens are summed.

use crate::error::{Result, TimerError};

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// Parse a duration like `"2h 30m"` into total seconds.
///
/// # Errors
///
/// - [`TimerError::NoDuration`] for blank input.
/// - [`TimerError::InvalidFormat`] if any token is malformed, the total
///   overflows, or the total is zero.
pub fn parse_duration(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(TimerError::NoDuration);
    }

    let mut total: u64 = 0;
    for token in input.split_whitespace() {
        let secs = parse_token(token)?;
        total = total.checked_add(secs).ok_or_else(|| {
            TimerError::InvalidFormat(format!("duration `{input}` is too large"))
        })?;
    }

    if total == 0 {
        return Err(TimerError::InvalidFormat(
            "duration must be positive".to_owned(),
        ));
    }
    Ok(total)
}

fn parse_token(token: &str) -> Result<u64> {
    let invalid = || {
        TimerError::InvalidFormat(format!(
            "bad duration part `{token}`; use `10s`, `5m`, `2h 30m` or `1d 3h`"
        ))
    };

    let Some(unit) = token.chars().last() else {
        return Err(invalid());
    };
    let digits = &token[..token.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let multiplier = match unit.to_ascii_lowercase() {
        's' => 1,
        'm' => SECS_PER_MINUTE,
        'h' => SECS_PER_HOUR,
        'd' => SECS_PER_DAY,
        _ => return Err(invalid()),
    };

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}

/// Format seconds as zero-padded `HH:MM:SS`. Negative input is clamped to zero.
///
/// Hours are not capped, so `format_hms(100 * 3600)` is `"100:00:00"`.
#[must_use]
pub fn format_hms(seconds: i64) -> String {
    let seconds = seconds.max(0).unsigned_abs();
    let hours = seconds / SECS_PER_HOUR;
    let minutes = (seconds % SECS_PER_HOUR) / SECS_PER_MINUTE;
    let secs = seconds % SECS_PER_MINUTE;
    format!("{hours:02}:{minutes:02}:{secs:02}")
}

/// Split chat-style command arguments into a duration and display text.
///
/// Leading words that parse as duration parts form the duration, the rest
/// is the text: `"5m 30s Tea is ready"` → `(330, "Tea is ready")`, and
/// `"10m 2nd batch"` → `(600, "2nd batch")`.
///
/// # Errors
///
/// - [`TimerError::NoDuration`] when the arguments or the text are missing.
/// - [`TimerError::InvalidFormat`] when the first word is not a duration part
///   or the duration does not add up to a positive value.
pub fn split_command_args(args: &str) -> Result<(u64, String)> {
    let mut rest = args.trim_start();
    if rest.is_empty() {
        return Err(TimerError::NoDuration);
    }

    let mut duration_tokens: Vec<&str> = Vec::new();
    let mut first_error = None;
    loop {
        let (token, tail) = rest
            .split_once(char::is_whitespace)
            .unwrap_or((rest, ""));
        if token.is_empty() {
            break;
        }
        match parse_token(token) {
            Ok(_) => {
                duration_tokens.push(token);
                rest = tail.trim_start();
            }
            Err(e) => {
                // A bad first word is the (bad) duration, not the text.
                if duration_tokens.is_empty() {
                    first_error = Some(e);
                    rest = tail.trim_start();
                }
                break;
            }
        }
    }

    let text = rest.trim();
    if text.is_empty() {
        return Err(TimerError::NoDuration);
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let seconds = parse_duration(&duration_tokens.join(" "))?;
    Ok((seconds, text.to_owned()))
}
