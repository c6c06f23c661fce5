//! Timing and keepalive configuration shared by connection workers.

use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Default write timeout: 10 seconds.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default grace period after sending a close frame: 5 seconds.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Connection worker configuration.
///
/// A `Config` is built once by the application and shared (usually behind an
/// `Arc`) by every worker. Its consistency is checked on first use and the
/// outcome is cached, so concurrent workers never re-run the check.
///
/// Keepalive is enabled by setting all of ping payload, ping frequency and
/// pong timeout; setting only some of them is an error.
///
/// ## Example
///
/// ```rust
/// use std::time::Duration;
/// use ws_lifecycle::Config;
///
/// let config = Config::new()
///     .with_keepalive("hb", Duration::from_secs(30), Duration::from_secs(45))
///     .with_write_timeout(Duration::from_secs(10));
///
/// assert!(config.validate().is_ok());
/// assert!(config.is_keepalive_enabled());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    ping_payload: Option<Bytes>,
    ping_frequency: Option<Duration>,
    pong_timeout: Option<Duration>,
    write_timeout: Duration,
    grace_period: Duration,
    validated: OnceLock<Result<()>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_payload: None,
            ping_frequency: None,
            pong_timeout: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            validated: OnceLock::new(),
        }
    }
}

impl Config {
    /// Create a configuration with keepalive disabled and default timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration with keepalive enabled and an empty ping payload.
    #[must_use]
    pub fn keepalive(ping_frequency: Duration, pong_timeout: Duration) -> Self {
        Self::new().with_keepalive(Bytes::new(), ping_frequency, pong_timeout)
    }

    /// Enable keepalive.
    #[must_use]
    pub fn with_keepalive(
        self,
        payload: impl Into<Bytes>,
        ping_frequency: Duration,
        pong_timeout: Duration,
    ) -> Self {
        self.with_ping_payload(payload)
            .with_ping_frequency(ping_frequency)
            .with_pong_timeout(pong_timeout)
    }

    /// Set the payload carried by keepalive pings.
    #[must_use]
    pub fn with_ping_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.ping_payload = Some(payload.into());
        self.reset()
    }

    /// Set how often keepalive pings are sent.
    #[must_use]
    pub fn with_ping_frequency(mut self, frequency: Duration) -> Self {
        self.ping_frequency = Some(frequency);
        self.reset()
    }

    /// Set how long to wait for a pong before declaring the peer dead.
    #[must_use]
    pub fn with_pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = Some(timeout);
        self.reset()
    }

    /// Set the deadline for data writes and keepalive pings.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self.reset()
    }

    /// Set how long the peer has to acknowledge a close frame.
    #[must_use]
    pub fn with_grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self.reset()
    }

    fn reset(mut self) -> Self {
        self.validated = OnceLock::new();
        self
    }

    /// The keepalive ping payload, if set.
    #[must_use]
    pub fn ping_payload(&self) -> Option<&Bytes> {
        self.ping_payload.as_ref()
    }

    /// The keepalive ping frequency, if set.
    #[must_use]
    pub const fn ping_frequency(&self) -> Option<Duration> {
        self.ping_frequency
    }

    /// The pong timeout, if set.
    #[must_use]
    pub const fn pong_timeout(&self) -> Option<Duration> {
        self.pong_timeout
    }

    /// The write timeout.
    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// The grace period after a close frame is sent.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Returns `true` iff ping payload, ping frequency and pong timeout are all set.
    #[must_use]
    pub const fn is_keepalive_enabled(&self) -> bool {
        self.ping_payload.is_some() && self.ping_frequency.is_some() && self.pong_timeout.is_some()
    }

    /// Check the configuration for internal consistency.
    ///
    /// The check runs at most once per `Config` value; every later call,
    /// including concurrent ones, returns the cached outcome.
    ///
    /// # Errors
    ///
    /// - `Error::PartialKeepaliveConfiguration` if only some keepalive fields are set
    /// - `Error::InvalidKeepaliveFrequency` if the ping frequency is zero or the
    ///   pong timeout is not strictly greater than ping frequency + write timeout
    /// - `Error::InvalidGracePeriod` if the grace period is zero
    pub fn validate(&self) -> Result<()> {
        self.validation().clone()
    }

    fn validation(&self) -> &Result<()> {
        self.validated.get_or_init(|| self.check())
    }

    fn check(&self) -> Result<()> {
        match (&self.ping_payload, self.ping_frequency, self.pong_timeout) {
            (None, None, None) => {}
            (Some(_), Some(frequency), Some(pong_timeout)) => {
                let invalid = frequency.is_zero()
                    || frequency
                        .checked_add(self.write_timeout)
                        .is_none_or(|window| pong_timeout <= window);
                if invalid {
                    return Err(Error::InvalidKeepaliveFrequency {
                        frequency,
                        write_timeout: self.write_timeout,
                        pong_timeout,
                    });
                }
            }
            _ => return Err(Error::PartialKeepaliveConfiguration),
        }

        if self.grace_period.is_zero() {
            return Err(Error::InvalidGracePeriod);
        }
        Ok(())
    }
}
