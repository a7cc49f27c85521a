//! Store configuration
//!
//! Collection pressure is tuned per store through [`StoreOptions`]. Stores
//! created with `Store::new` / `Store::local` use [`StoreOptions::global`],
//! which reads the environment once per process.
//!
//! ## Configuration (Environment Variables)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FRAME_GC_THRESHOLD` | `1048576` | Bytes allocated before the first collection |
//! | `FRAME_GC_MIN_THRESHOLD` | `262144` | Lower bound for the threshold after a collection |
//! | `FRAME_GC_GROWTH` | `200` | Next threshold as a percentage of live bytes |
//!
//! ## Example
//!
//! ```bash
//! # Collect early and often while chasing a stale-handle bug
//! FRAME_GC_THRESHOLD=4096 FRAME_GC_MIN_THRESHOLD=4096 ./my-pipeline
//! ```

use std::sync::OnceLock;

pub const DEFAULT_GC_THRESHOLD: usize = 1 << 20;
pub const DEFAULT_GC_MIN_THRESHOLD: usize = 256 << 10;
pub const DEFAULT_GC_GROWTH_PERCENT: usize = 200;

/// Collection policy for a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Bytes allocated before the first collection
    pub gc_threshold: usize,
    /// Lower bound for the threshold computed after each collection
    pub gc_min_threshold: usize,
    /// Next threshold = live bytes * growth / 100
    pub gc_growth_percent: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            gc_threshold: DEFAULT_GC_THRESHOLD,
            gc_min_threshold: DEFAULT_GC_MIN_THRESHOLD,
            gc_growth_percent: DEFAULT_GC_GROWTH_PERCENT,
        }
    }
}

impl StoreOptions {
    /// Load options from environment variables
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let gc_threshold = std::env::var("FRAME_GC_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_GC_THRESHOLD);

        let gc_min_threshold = std::env::var("FRAME_GC_MIN_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_GC_MIN_THRESHOLD);

        let gc_growth_percent = std::env::var("FRAME_GC_GROWTH")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&v| v >= 100)
            .unwrap_or(DEFAULT_GC_GROWTH_PERCENT);

        Self {
            gc_threshold,
            gc_min_threshold,
            gc_growth_percent,
        }
    }

    /// Process-wide options, read from the environment on first use
    pub fn global() -> &'static StoreOptions {
        static OPTIONS: OnceLock<StoreOptions> = OnceLock::new();
        OPTIONS.get_or_init(StoreOptions::from_env)
    }

    pub fn with_gc_threshold(mut self, bytes: usize) -> Self {
        self.gc_threshold = bytes;
        self
    }

    pub fn with_gc_min_threshold(mut self, bytes: usize) -> Self {
        self.gc_min_threshold = bytes;
        self
    }

    pub fn with_gc_growth_percent(mut self, percent: usize) -> Self {
        self.gc_growth_percent = percent.max(100);
        self
    }

    /// Threshold to use after a collection that left `live_bytes` behind
    pub fn next_threshold(&self, live_bytes: usize) -> usize {
        (live_bytes.saturating_mul(self.gc_growth_percent) / 100).max(self.gc_min_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // SAFETY: callers are #[serial], so no concurrent env access
    unsafe fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) };
    }

    unsafe fn restore_env(key: &str, value: Option<String>) {
        match value {
            Some(v) => unsafe { std::env::set_var(key, v) },
            None => unsafe { std::env::remove_var(key) },
        }
    }

    const KEYS: [&str; 3] = [
        "FRAME_GC_THRESHOLD",
        "FRAME_GC_MIN_THRESHOLD",
        "FRAME_GC_GROWTH",
    ];

    fn save() -> Vec<Option<String>> {
        KEYS.iter().map(|k| std::env::var(k).ok()).collect()
    }

    fn restore(saved: Vec<Option<String>>) {
        for (key, value) in KEYS.iter().zip(saved) {
            unsafe { restore_env(key, value) };
        }
    }

    #[test]
    fn test_defaults() {
        let options = StoreOptions::default();
        assert_eq!(options.gc_threshold, DEFAULT_GC_THRESHOLD);
        assert_eq!(options.gc_min_threshold, DEFAULT_GC_MIN_THRESHOLD);
        assert_eq!(options.gc_growth_percent, DEFAULT_GC_GROWTH_PERCENT);
    }

    #[test]
    #[serial]
    fn test_from_env_all_values() {
        let saved = save();
        unsafe {
            set_env("FRAME_GC_THRESHOLD", "4096");
            set_env("FRAME_GC_MIN_THRESHOLD", "1024");
            set_env("FRAME_GC_GROWTH", "300");
        }

        let options = StoreOptions::from_env();
        assert_eq!(options.gc_threshold, 4096);
        assert_eq!(options.gc_min_threshold, 1024);
        assert_eq!(options.gc_growth_percent, 300);

        restore(saved);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_values() {
        let saved = save();
        unsafe {
            set_env("FRAME_GC_THRESHOLD", "lots");
            set_env("FRAME_GC_MIN_THRESHOLD", "0");
            set_env("FRAME_GC_GROWTH", "50");
        }

        assert_eq!(StoreOptions::from_env(), StoreOptions::default());

        restore(saved);
    }

    #[test]
    fn test_next_threshold() {
        let options = StoreOptions::default()
            .with_gc_min_threshold(100)
            .with_gc_growth_percent(200);
        assert_eq!(options.next_threshold(10), 100);
        assert_eq!(options.next_threshold(1000), 2000);
    }

    #[test]
    fn test_growth_is_clamped() {
        let options = StoreOptions::default().with_gc_growth_percent(10);
        assert_eq!(options.gc_growth_percent, 100);
    }
}
