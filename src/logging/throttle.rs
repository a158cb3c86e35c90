//! Rate-limited logging.
//!
//! A market whose oracle feed is down would otherwise emit the same
//! warning every tick. `LogThrottle` lets one line through per interval
//! and counts what it swallowed so nothing disappears silently.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Rate limiter for a single repeating log line.
#[derive(Debug)]
pub struct LogThrottle {
    last_log_time: Option<Instant>,
    suppressed_count: u64,
    interval: Duration,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_log_time: None,
            suppressed_count: 0,
            interval,
        }
    }

    /// True when the interval has passed since the last emitted line.
    /// Otherwise the suppressed counter is bumped.
    pub fn should_log(&mut self) -> bool {
        let now = Instant::now();
        match self.last_log_time {
            Some(last) => {
                if now.duration_since(last) >= self.interval {
                    self.last_log_time = Some(now);
                    true
                } else {
                    self.suppressed_count += 1;
                    false
                }
            }
            None => {
                self.last_log_time = Some(now);
                true
            }
        }
    }

    /// Number of lines suppressed since the last emitted one. Resets on
    /// read so it can be folded into the next emitted line.
    pub fn get_and_reset_suppressed_count(&mut self) -> u64 {
        let count = self.suppressed_count;
        self.suppressed_count = 0;
        count
    }
}

/// One throttle per market, created lazily on first use.
#[derive(Debug)]
pub struct MarketThrottles {
    interval: Duration,
    throttles: HashMap<u64, LogThrottle>,
}

impl MarketThrottles {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            throttles: HashMap::new(),
        }
    }

    pub fn market(&mut self, market_id: u64) -> &mut LogThrottle {
        self.throttles
            .entry(market_id)
            .or_insert_with(|| LogThrottle::new(self.interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_log_always_passes() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_log());
    }

    #[test]
    fn test_repeat_within_interval_is_suppressed_and_counted() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_log());
        assert!(!throttle.should_log());
        assert!(!throttle.should_log());
        assert_eq!(throttle.get_and_reset_suppressed_count(), 2);
        assert_eq!(throttle.get_and_reset_suppressed_count(), 0);
    }

    #[test]
    fn test_elapsed_interval_lets_the_next_line_through() {
        let mut throttle = LogThrottle::new(Duration::ZERO);
        assert!(throttle.should_log());
        assert!(throttle.should_log());
    }

    #[test]
    fn test_markets_throttle_independently() {
        let mut throttles = MarketThrottles::new(Duration::from_secs(60));
        assert!(throttles.market(1).should_log());
        assert!(throttles.market(2).should_log());
        assert!(!throttles.market(1).should_log());
    }
}
