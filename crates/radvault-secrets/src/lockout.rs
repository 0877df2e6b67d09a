//! Escalating lockout after repeated failed attempts.
//!
//! Once the failed count reaches the limit, every further failure adds one
//! step to the enforced wait. After the wait the counter drops back to one
//! below the limit, so the next failure is met with a single step again.

/// Seconds per lockout step
pub const LOCKOUT_STEP_SECS: u32 = 30;

/// Busy-wait granularity of the countdown loop
pub const TICK_MS: u32 = 10;
pub const TICKS_PER_SECOND: u32 = 1000 / TICK_MS;

/// The watchdog is serviced every this many ticks
pub const WATCHDOG_TICKS: u32 = 20;

/// Wait owed for `failed` attempts against `max_tries`, if any.
pub fn wait_secs(failed: u8, max_tries: u8) -> Option<u32> {
    if max_tries == 0 || failed < max_tries {
        return None;
    }
    Some((failed - max_tries + 1) as u32 * LOCKOUT_STEP_SECS)
}

/// Failed-attempt count to store once a wait has been served.
pub fn attempts_after_wait(max_tries: u8) -> u8 {
    max_tries.saturating_sub(1)
}
