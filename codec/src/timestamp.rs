// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright 2025 The payhop contributors

//! Compacted timestamps.
//!
//! Minute-granularity tokens carry time as a 16-bit counter: minutes since
//! the Unix epoch mod 2^16, wrapping every 65536 minutes (~45.5 days).
//! Expansion picks the absolute minute congruent to the counter that lies
//! nearest to "now", which resolves the wrap-around ambiguity at the cycle
//! boundary and also reconstructs stamps a few minutes in the future from a
//! skewed sender clock. The reconstructed instant is at most ~22.7 days
//! from `now` in either direction; schema windows enforce the real bound.

/// Length of one counter cycle in minutes.
pub const MINUTE_CYCLE: i64 = 1 << 16;

/// Hard ceiling on any schema expiration window. Beyond half a cycle the
/// wrapped counter no longer identifies a unique instant.
pub const MAX_WINDOW_SECS: u64 = (MINUTE_CYCLE as u64 / 2 - 1) * 60;

/// Reduce an absolute Unix time to the 16-bit minute counter.
pub fn compact(unix_secs: i64) -> u16 {
    (unix_secs.div_euclid(60).rem_euclid(MINUTE_CYCLE)) as u16
}

/// Reconstruct the absolute Unix time (whole-minute precision) from a
/// counter value and the receiver's clock.
pub fn expand(counter: u16, now_secs: i64) -> i64 {
    let now_min = now_secs.div_euclid(60);
    let behind = (now_min - i64::from(counter)).rem_euclid(MINUTE_CYCLE);
    let mut minute = now_min - behind;
    if behind > MINUTE_CYCLE / 2 {
        // Closer as a future stamp in the next cycle (skewed sender clock).
        minute += MINUTE_CYCLE;
    }
    minute * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_040; // an arbitrary minute-aligned instant

    #[test]
    fn compact_is_minutes_mod_cycle() {
        assert_eq!(compact(0), 0);
        assert_eq!(compact(59), 0);
        assert_eq!(compact(60), 1);
        assert_eq!(compact(MINUTE_CYCLE * 60), 0);
        assert_eq!(compact((MINUTE_CYCLE + 5) * 60), 5);
    }

    #[test]
    fn expand_recent_past() {
        let issued = T0;
        let now = T0 + 90 * 60; // 90 minutes later
        assert_eq!(expand(compact(issued), now), issued);
    }

    #[test]
    fn expand_same_minute() {
        assert_eq!(expand(compact(T0), T0), T0);
        // sub-minute precision is deliberately lost
        assert_eq!(expand(compact(T0 + 30), T0 + 30), T0);
    }

    #[test]
    fn expand_across_wrap_boundary() {
        // Token stamped at counter 65535, decoded just after the counter
        // wrapped to 0: must resolve to the previous cycle, minutes ago.
        let issued_min = 3 * MINUTE_CYCLE - 1; // counter = 65535
        let issued = issued_min * 60;
        assert_eq!(compact(issued), 65535);

        let now = (3 * MINUTE_CYCLE + 4) * 60; // counter wrapped, now at 4
        assert_eq!(expand(65535, now), issued);
    }

    #[test]
    fn expand_small_future_skew() {
        // Sender clock 2 minutes ahead of ours: still the nearest candidate,
        // not a stamp from 45 days ago.
        let now = T0;
        let issued = T0 + 2 * 60;
        assert_eq!(expand(compact(issued), now), issued);
    }

    #[test]
    fn expand_future_skew_across_wrap() {
        // Sender already wrapped to counter 1; we are still at 65534.
        let now = (5 * MINUTE_CYCLE - 2) * 60;
        let issued = (5 * MINUTE_CYCLE + 1) * 60;
        assert_eq!(expand(compact(issued), now), issued);
    }

    #[test]
    fn half_cycle_is_the_ambiguity_limit() {
        // Anything older than half a cycle aliases to a nearer candidate;
        // windows must stay under MAX_WINDOW_SECS.
        let issued = T0;
        let now = T0 + (MINUTE_CYCLE / 2 + 10) * 60;
        let expanded = expand(compact(issued), now);
        assert_ne!(expanded, issued);
        assert!(expanded > now);
    }
}
