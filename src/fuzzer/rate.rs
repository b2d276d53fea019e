//! Request pacing: per-request delay and a pool-wide rate limit

use parking_lot::Mutex;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::ConfigError;

/// Sleep before each request, fixed or sampled uniformly from a range
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Delay {
    min: Duration,
    max: Option<Duration>,
}

impl Delay {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: None,
        }
    }

    pub fn range(min: Duration, max: Duration) -> Self {
        Self { min, max: Some(max) }
    }

    pub fn is_zero(&self) -> bool {
        self.min.is_zero() && self.max.map_or(true, |max| max.is_zero())
    }

    pub fn is_valid(&self) -> bool {
        self.max.map_or(true, |max| self.min <= max)
    }

    pub fn sample(&self) -> Duration {
        match self.max {
            Some(max) if max > self.min => {
                let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..=max.as_secs_f64());
                Duration::from_secs_f64(secs)
            }
            _ => self.min,
        }
    }
}

impl FromStr for Delay {
    type Err = ConfigError;

    /// Seconds, either `"0.1"` or `"0.1-0.8"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidDelay(s.to_string());
        let secs = |v: &str| {
            v.trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite() && *n >= 0.0)
                .map(Duration::from_secs_f64)
                .ok_or_else(invalid)
        };

        let s_trim = s.trim();
        if s_trim.is_empty() {
            return Ok(Self::default());
        }
        match s_trim.split_once('-') {
            Some((min, max)) => {
                let delay = Self::range(secs(min)?, secs(max)?);
                if !delay.is_valid() {
                    return Err(invalid());
                }
                Ok(delay)
            }
            None => Ok(Self::fixed(secs(s_trim)?)),
        }
    }
}

impl fmt::Display for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{:.3}-{:.3}s", self.min.as_secs_f64(), max.as_secs_f64()),
            None => write!(f, "{:.3}s", self.min.as_secs_f64()),
        }
    }
}

/// Token bucket shared by every worker of a job
#[derive(Debug)]
pub struct RateLimiter {
    per_second: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// `per_second` must be positive
    pub fn new(per_second: u32) -> Self {
        Self {
            per_second: per_second.max(1) as f64,
            bucket: Mutex::new(Bucket {
                tokens: 1.0,
                last: Instant::now(),
            }),
        }
    }

    pub fn per_second(&self) -> f64 {
        self.per_second
    }

    /// Take one token, waiting for a refill if the bucket is empty
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                let now = Instant::now();
                let refill = now.duration_since(bucket.last).as_secs_f64() * self.per_second;
                bucket.tokens = (bucket.tokens + refill).min(1.0);
                bucket.last = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_second)
            };
            tokio::time::sleep(wait).await;
        }
    }
}
