//! Driver configuration
//!
//! Built in three layers: defaults, then environment overrides, then
//! whatever the caller (usually the CLI) sets explicitly.
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `NPU_PROFILE` | register profile name |
//! | `NPU_POLL_BUDGET` | wait policy: max status reads per wait |
//! | `NPU_POLL_DEADLINE_MS` | wait policy: wall-clock limit per wait |
//! | `NPU_PE_SETTLE_US` | MAC PE settling delay |

use crate::error::{NpuError, Result};
use crate::mmio::RegisterBus;
use crate::sequencer::{Sequencer, DEFAULT_PE_SETTLE};
use crate::wait::WaitPolicy;
use npu_chip::{RegisterProfile, DEFAULT_PROFILE};
use std::time::Duration;

/// Environment variable names.
pub mod env {
    /// Register profile name
    pub const PROFILE: &str = "NPU_PROFILE";
    /// Poll budget per wait
    pub const POLL_BUDGET: &str = "NPU_POLL_BUDGET";
    /// Deadline per wait, milliseconds
    pub const POLL_DEADLINE_MS: &str = "NPU_POLL_DEADLINE_MS";
    /// MAC PE settling delay, microseconds
    pub const PE_SETTLE_US: &str = "NPU_PE_SETTLE_US";
}

/// Everything needed to bring up a [`Sequencer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NpuConfig {
    /// Register layout of the loaded bitstream
    pub profile: &'static RegisterProfile,
    /// Bound on every status poll
    pub wait: WaitPolicy,
    /// MAC PE settling delay
    pub pe_settle: Duration,
}

impl Default for NpuConfig {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE,
            wait: WaitPolicy::default(),
            pe_settle: DEFAULT_PE_SETTLE,
        }
    }
}

impl NpuConfig {
    /// Defaults with the process environment applied.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| {
            std::env::var_os(key).map(|v| v.to_string_lossy().into_owned())
        })
    }

    /// Apply overrides from `lookup` (variable name → value).
    ///
    /// # Errors
    ///
    /// Returns error for an unknown profile, an unparsable number, a zero
    /// poll budget, or when both a poll budget and a deadline are given.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(name) = lookup(env::PROFILE) {
            self = self.with_profile_name(name.trim())?;
        }

        let budget = lookup(env::POLL_BUDGET)
            .map(|v| parse_number(env::POLL_BUDGET, &v))
            .transpose()?;
        let deadline = lookup(env::POLL_DEADLINE_MS)
            .map(|v| parse_number(env::POLL_DEADLINE_MS, &v))
            .transpose()?;
        match (budget, deadline) {
            (Some(_), Some(_)) => {
                return Err(NpuError::invalid_argument(format!(
                    "{} and {} are mutually exclusive",
                    env::POLL_BUDGET,
                    env::POLL_DEADLINE_MS
                )))
            }
            (Some(polls), None) => self = self.with_poll_budget(polls)?,
            (None, Some(ms)) => self.wait = WaitPolicy::Deadline(Duration::from_millis(ms)),
            (None, None) => {}
        }

        if let Some(v) = lookup(env::PE_SETTLE_US) {
            self.pe_settle = Duration::from_micros(parse_number(env::PE_SETTLE_US, &v)?);
        }

        tracing::debug!("Configuration: {self:?}");
        Ok(self)
    }

    /// Select a profile by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProfile` if no shipped profile has that name.
    pub fn with_profile_name(mut self, name: &str) -> Result<Self> {
        self.profile = RegisterProfile::by_name(name).ok_or_else(|| NpuError::UnknownProfile {
            name: name.to_string(),
        })?;
        Ok(self)
    }

    /// Bound every wait to `polls` status reads.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero budget, which would report a
    /// timeout on every wait without reading the status once.
    pub fn with_poll_budget(mut self, polls: u64) -> Result<Self> {
        if polls == 0 {
            return Err(NpuError::invalid_argument("poll budget must be at least 1"));
        }
        self.wait = WaitPolicy::Attempts(polls);
        Ok(self)
    }

    /// Sequencer over `bus` with this configuration.
    pub fn sequencer<B: RegisterBus>(&self, bus: B) -> Sequencer<B> {
        Sequencer::new(bus, self.profile)
            .with_wait_policy(self.wait)
            .with_pe_settle(self.pe_settle)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|e| {
        NpuError::invalid_argument(format!("{key}={value:?} is not a valid number: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = NpuConfig::default();
        assert_eq!(cfg.profile.name, "hps-msgdma");
        assert_eq!(cfg.wait, WaitPolicy::Attempts(100_000_000));
        assert_eq!(cfg.pe_settle, Duration::from_micros(1));
    }

    #[test]
    fn overrides_apply() {
        let cfg = NpuConfig::default()
            .with_overrides(lookup(&[
                (env::PROFILE, "nios-legacy"),
                (env::POLL_DEADLINE_MS, "250"),
                (env::PE_SETTLE_US, "0"),
            ]))
            .unwrap();
        assert_eq!(cfg.profile.name, "nios-legacy");
        assert_eq!(cfg.wait, WaitPolicy::Deadline(Duration::from_millis(250)));
        assert!(cfg.pe_settle.is_zero());
    }

    #[test]
    fn invalid_values_are_errors() {
        let base = NpuConfig::default();
        assert!(matches!(
            base.with_overrides(lookup(&[(env::PROFILE, "akd1000")])),
            Err(NpuError::UnknownProfile { .. })
        ));
        assert!(base
            .with_overrides(lookup(&[(env::POLL_BUDGET, "lots")]))
            .is_err());
        assert!(base
            .with_overrides(lookup(&[(env::POLL_BUDGET, "10"), (env::POLL_DEADLINE_MS, "10")]))
            .is_err());
    }

    #[test]
    fn zero_poll_budget_is_rejected() {
        assert!(matches!(
            NpuConfig::default().with_overrides(lookup(&[(env::POLL_BUDGET, "0")])),
            Err(NpuError::InvalidArgument { .. })
        ));
        assert!(NpuConfig::default().with_poll_budget(0).is_err());
        assert_eq!(
            NpuConfig::default().with_poll_budget(1).unwrap().wait,
            WaitPolicy::Attempts(1)
        );
    }

    #[test]
    fn sequencer_inherits_settings() {
        let cfg = NpuConfig {
            wait: WaitPolicy::Attempts(5),
            ..NpuConfig::default()
        };
        let bus = crate::testing::RecordingBus::new();
        let seq = cfg.sequencer(&bus);
        assert_eq!(seq.wait_policy(), WaitPolicy::Attempts(5));
        assert_eq!(seq.profile().name, "hps-msgdma");
    }
}
