//! Ring-set configuration, validation, and error types.
//!
//! [`RingConfig`] is the input to [`RingSet::with_config`](crate::RingSet::with_config).
//! [`resolve()`](RingConfig::resolve) validates it and produces the
//! power-of-two entry counts the rings are built with.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use hopring_core::SetupError;

/// Largest submission queue.
pub const MAX_SQ_ENTRIES: u32 = 32_768;
/// Largest completion queue.
pub const MAX_CQ_ENTRIES: u32 = 65_536;
/// Most completion queues in one ring set.
pub const MAX_CQS: usize = 16;

// ── SqPollConfig ───────────────────────────────────────────────────

/// Submission-queue polling.
///
/// The dispatcher polls the SQ without waiting for doorbells. After
/// `idle_ms` without work it sets
/// [`SqFlags::NEED_WAKEUP`](hopring_ring::SqFlags::NEED_WAKEUP) and
/// blocks; [`submit`](crate::RingSet::submit) only rings the doorbell
/// while that flag is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqPollConfig {
    /// Idle time before the poller sleeps. Default: 10.
    pub idle_ms: u64,
}

impl Default for SqPollConfig {
    fn default() -> Self {
        Self { idle_ms: 10 }
    }
}

impl SqPollConfig {
    /// Idle time as a [`Duration`].
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`RingConfig::resolve()`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A queue was configured with zero entries.
    ZeroEntries {
        /// Which queue.
        queue: String,
    },
    /// A queue exceeds its maximum and clamping is off.
    TooManyEntries {
        /// Which queue.
        queue: String,
        /// Configured entry count.
        entries: u32,
        /// Maximum allowed.
        max: u32,
    },
    /// More completion queues than [`MAX_CQS`].
    TooManyQueues {
        /// Configured count.
        count: usize,
    },
    /// `max_programs` is zero.
    NoProgramSlots,
    /// `counter_slots` is zero.
    NoCounters,
    /// `max_inflight` is zero.
    NoInflight,
    /// SQ polling with a zero idle time.
    ZeroPollIdle,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroEntries { queue } => write!(f, "{queue} has zero entries"),
            Self::TooManyEntries {
                queue,
                entries,
                max,
            } => write!(f, "{queue} has {entries} entries, maximum is {max}"),
            Self::TooManyQueues { count } => {
                write!(f, "{count} completion queues configured, maximum is {MAX_CQS}")
            }
            Self::NoProgramSlots => write!(f, "max_programs must be at least 1"),
            Self::NoCounters => write!(f, "counter_slots must be at least 1"),
            Self::NoInflight => write!(f, "max_inflight must be at least 1"),
            Self::ZeroPollIdle => write!(f, "sq_poll idle_ms must be at least 1"),
        }
    }
}

impl Error for ConfigError {}

impl From<ConfigError> for SetupError {
    fn from(e: ConfigError) -> Self {
        SetupError::InvalidConfig {
            reason: e.to_string(),
        }
    }
}

// ── RingConfig ─────────────────────────────────────────────────────

/// Complete configuration for a ring set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingConfig {
    /// Submission queue entries, rounded up to a power of two. Default: 8.
    pub sq_entries: u32,
    /// Entries per completion queue, by index. Empty means one queue of
    /// `2 * sq_entries`. Default: empty.
    pub cq_sizes: Vec<u32>,
    /// Clamp oversize entry counts to their maximum instead of failing.
    /// Default: false.
    pub clamp: bool,
    /// SQ polling. `None` means every submit rings the doorbell.
    pub sq_poll: Option<SqPollConfig>,
    /// Program worker threads. `None` = auto-detect
    /// (`available_parallelism / 2`, clamped to `[2, 16]`).
    pub worker_count: Option<usize>,
    /// Counters in the shared counting table. Default: 10.
    pub counter_slots: usize,
    /// Registry capacity. Default: 64.
    pub max_programs: usize,
    /// Invocations queued to workers before the dispatcher back-pressures.
    /// Default: 256.
    pub max_inflight: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            sq_entries: 8,
            cq_sizes: Vec::new(),
            clamp: false,
            sq_poll: None,
            worker_count: None,
            counter_slots: 10,
            max_programs: 64,
            max_inflight: 256,
        }
    }
}

/// Entry counts after rounding and clamping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSizes {
    /// Submission queue entries.
    pub sq_entries: u32,
    /// Completion queue entries, by index.
    pub cq_entries: Vec<u32>,
}

impl RingConfig {
    /// A config with `sq_entries` and explicit completion queue sizes.
    pub fn with_queues(sq_entries: u32, cq_sizes: &[u32]) -> Self {
        Self {
            sq_entries,
            cq_sizes: cq_sizes.to_vec(),
            ..Self::default()
        }
    }

    /// Check every invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve().map(|_| ())
    }

    /// Validate and compute the entry counts the rings are built with.
    pub fn resolve(&self) -> Result<ResolvedSizes, ConfigError> {
        if self.max_programs == 0 {
            return Err(ConfigError::NoProgramSlots);
        }
        if self.counter_slots == 0 {
            return Err(ConfigError::NoCounters);
        }
        if self.max_inflight == 0 {
            return Err(ConfigError::NoInflight);
        }
        if matches!(&self.sq_poll, Some(p) if p.idle_ms == 0) {
            return Err(ConfigError::ZeroPollIdle);
        }
        if self.cq_sizes.len() > MAX_CQS {
            return Err(ConfigError::TooManyQueues {
                count: self.cq_sizes.len(),
            });
        }

        let sq_entries = self.round("submission queue".into(), self.sq_entries, MAX_SQ_ENTRIES)?;
        let cq_entries = if self.cq_sizes.is_empty() {
            vec![(sq_entries * 2).min(MAX_CQ_ENTRIES)]
        } else {
            self.cq_sizes
                .iter()
                .enumerate()
                .map(|(i, &n)| self.round(format!("completion queue {i}"), n, MAX_CQ_ENTRIES))
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(ResolvedSizes {
            sq_entries,
            cq_entries,
        })
    }

    fn round(&self, queue: String, entries: u32, max: u32) -> Result<u32, ConfigError> {
        if entries == 0 {
            return Err(ConfigError::ZeroEntries { queue });
        }
        if entries > max {
            if self.clamp {
                return Ok(max);
            }
            return Err(ConfigError::TooManyEntries {
                queue,
                entries,
                max,
            });
        }
        // `max` is a power of two, so rounding cannot exceed it.
        Ok(entries.next_power_of_two())
    }

    /// Resolve the actual worker count, applying auto-detection if `None`.
    ///
    /// Explicit values are clamped to `[1, 64]`.
    pub fn resolved_worker_count(&self) -> usize {
        match self.worker_count {
            Some(n) => n.clamp(1, 64),
            None => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4);
                (cpus / 2).clamp(2, 16)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_one_cq_of_twice_sq() {
        let sizes = RingConfig::default().resolve().unwrap();
        assert_eq!(sizes.sq_entries, 8);
        assert_eq!(sizes.cq_entries, vec![16]);
    }

    #[test]
    fn sizes_round_up_to_powers_of_two() {
        let sizes = RingConfig::with_queues(5, &[100, 128, 1]).resolve().unwrap();
        assert_eq!(sizes.sq_entries, 8);
        assert_eq!(sizes.cq_entries, vec![128, 128, 1]);
    }

    #[test]
    fn oversize_fails_unless_clamped() {
        let mut cfg = RingConfig::with_queues(MAX_SQ_ENTRIES + 1, &[8]);
        assert!(matches!(
            cfg.resolve(),
            Err(ConfigError::TooManyEntries { max: MAX_SQ_ENTRIES, .. })
        ));
        cfg.clamp = true;
        cfg.cq_sizes = vec![u32::MAX];
        let sizes = cfg.resolve().unwrap();
        assert_eq!(sizes.sq_entries, MAX_SQ_ENTRIES);
        assert_eq!(sizes.cq_entries, vec![MAX_CQ_ENTRIES]);
    }

    #[test]
    fn zero_entries_rejected_even_when_clamping() {
        let mut cfg = RingConfig::with_queues(8, &[16, 0]);
        cfg.clamp = true;
        assert_eq!(
            cfg.resolve(),
            Err(ConfigError::ZeroEntries {
                queue: "completion queue 1".into()
            })
        );
    }

    #[test]
    fn too_many_queues_rejected() {
        let cfg = RingConfig::with_queues(8, &[8; MAX_CQS + 1]);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::TooManyQueues { count: MAX_CQS + 1 })
        );
    }

    #[test]
    fn zero_counter_slots_rejected() {
        let cfg = RingConfig {
            counter_slots: 0,
            ..RingConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::NoCounters));
    }

    #[test]
    fn zero_poll_idle_rejected() {
        let cfg = RingConfig {
            sq_poll: Some(SqPollConfig { idle_ms: 0 }),
            ..RingConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroPollIdle));
    }

    #[test]
    fn worker_count_is_clamped() {
        let mut cfg = RingConfig {
            worker_count: Some(0),
            ..RingConfig::default()
        };
        assert_eq!(cfg.resolved_worker_count(), 1);
        cfg.worker_count = Some(1000);
        assert_eq!(cfg.resolved_worker_count(), 64);
        cfg.worker_count = None;
        assert!((2..=16).contains(&cfg.resolved_worker_count()));
    }

    #[test]
    fn config_error_converts_to_setup_error() {
        let e: SetupError = ConfigError::NoProgramSlots.into();
        assert_eq!(
            e,
            SetupError::InvalidConfig {
                reason: "max_programs must be at least 1".into()
            }
        );
    }
}
