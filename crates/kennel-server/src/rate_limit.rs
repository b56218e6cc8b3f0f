//! Per-connection rate limiting for robot telemetry
//!
//! Each robot connection owns one `ConnectionRateLimiter`; counters are
//! plain atomics so checks never await.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use kennel_core::MAX_FRAME_BYTES;

/// Message rate limits, frame size cap and abuse threshold.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Max telemetry messages per second
    pub telemetry_hz: u32,
    /// Max frames per second; excess frames are stripped, not the message
    pub frame_hz: u32,
    /// Largest decoded frame accepted
    pub max_frame_bytes: usize,
    /// Seconds of sustained drops before recommending disconnect
    pub abuse_threshold_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            telemetry_hz: 30,
            frame_hz: 15,
            max_frame_bytes: MAX_FRAME_BYTES,
            abuse_threshold_secs: 10,
        }
    }
}

/// One-second window counter.
///
/// The window restarts via CAS once a full second has passed since its start.
struct Window {
    count: AtomicU64,
    start_ms: AtomicU64,
}

impl Window {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            start_ms: AtomicU64::new(0),
        }
    }

    /// Count one arrival and return the count in the current window
    fn record(&self, now_ms: u64) -> u64 {
        let start = self.start_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(start) >= 1000
            && self
                .start_ms
                .compare_exchange(start, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.count.store(1, Ordering::Relaxed);
            return 1;
        }
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCheck {
    Allowed,
    Dropped,
}

/// Per-robot-connection rate limiter.
pub struct ConnectionRateLimiter {
    config: RateLimitConfig,
    epoch: Instant,
    telemetry: Window,
    frames: Window,
    total_dropped: AtomicU64,
    /// Consecutive abuse checks that saw recent drops
    abuse_seconds: AtomicU64,
    last_drop_second: AtomicU64,
    last_log_second: AtomicU64,
}

impl ConnectionRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            epoch: Instant::now(),
            telemetry: Window::new(),
            frames: Window::new(),
            total_dropped: AtomicU64::new(0),
            abuse_seconds: AtomicU64::new(0),
            last_drop_second: AtomicU64::new(u64::MAX),
            last_log_second: AtomicU64::new(u64::MAX),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Check an inbound telemetry message as a whole.
    pub fn check_telemetry(&self) -> RateCheck {
        self.check_telemetry_at(self.now_ms())
    }

    fn check_telemetry_at(&self, now_ms: u64) -> RateCheck {
        if self.telemetry.record(now_ms) > self.config.telemetry_hz as u64 {
            self.record_drop(now_ms);
            return RateCheck::Dropped;
        }
        RateCheck::Allowed
    }

    /// Check a frame carried by an accepted telemetry message.
    ///
    /// A dropped frame is simply not stored; the snapshot keeps the previous
    /// one until a newer frame gets through.
    pub fn check_frame(&self, frame_len: usize) -> RateCheck {
        self.check_frame_at(frame_len, self.now_ms())
    }

    fn check_frame_at(&self, frame_len: usize, now_ms: u64) -> RateCheck {
        if frame_len > self.config.max_frame_bytes {
            self.record_drop(now_ms);
            return RateCheck::Dropped;
        }
        if self.frames.record(now_ms) > self.config.frame_hz as u64 {
            self.record_drop(now_ms);
            return RateCheck::Dropped;
        }
        RateCheck::Allowed
    }

    fn record_drop(&self, now_ms: u64) {
        self.total_dropped.fetch_add(1, Ordering::Relaxed);
        self.last_drop_second.store(now_ms / 1000, Ordering::Relaxed);
    }

    /// Check for sustained abuse. Call roughly once per second.
    ///
    /// Returns `true` when the robot should be disconnected.
    pub fn tick_abuse_check(&self) -> bool {
        self.tick_abuse_check_at(self.now_ms())
    }

    fn tick_abuse_check_at(&self, now_ms: u64) -> bool {
        let current_second = now_ms / 1000;
        let last_drop = self.last_drop_second.load(Ordering::Relaxed);

        if last_drop == current_second || last_drop == current_second.saturating_sub(1) {
            let secs = self.abuse_seconds.fetch_add(1, Ordering::Relaxed) + 1;
            secs >= self.config.abuse_threshold_secs
        } else {
            self.abuse_seconds.store(0, Ordering::Relaxed);
            false
        }
    }

    /// Returns true if a drop warning should be logged now (at most 1/sec).
    pub fn should_log_drop(&self) -> bool {
        let current_second = self.now_ms() / 1000;
        let last = self.last_log_second.load(Ordering::Relaxed);
        current_second != last
            && self
                .last_log_second
                .compare_exchange(last, current_second, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
    }

    pub fn dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }
}
