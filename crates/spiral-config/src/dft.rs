//! Runtime configuration for the two-pass DFT pipeline.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use tracing::warn;

pub const SHADER_DIR_ENV: &str = "ST_DFT_SHADER_DIR";
pub const READBACK_TIMEOUT_ENV: &str = "ST_DFT_READBACK_TIMEOUT_MS";
pub const RELEASE_ENV: &str = "ST_DFT_RELEASE";
pub const KERNELS_ENV: &str = "ST_DFT_KERNELS";
pub const POWER_ENV: &str = "ST_DFT_POWER";
pub const FALLBACK_ADAPTER_ENV: &str = "ST_DFT_FALLBACK_ADAPTER";

/// Default deadline for the map-for-read wait at the end of an invocation.
pub const DEFAULT_READBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// When pass-specific GPU objects may be released.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Release right after submission. The execution environment keeps its
    /// own reference to resources used by in-flight work.
    #[default]
    Retained,
    /// Block until a submission retires before releasing what it used and
    /// before encoding the dependent pass.
    WaitIdle,
}

/// Which binding contract the kernels are compiled against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KernelFamily {
    /// Four slots, the last carrying the direction flag.
    #[default]
    Directional,
    /// Three slots without a direction flag; forward transforms only.
    ForwardOnly,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerMode {
    #[default]
    HighPerformance,
    LowPower,
}

/// Runtime knobs for device selection, kernel loading, and readback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DftConfig {
    /// Directory containing the WGSL templates. `None` uses the bundled set.
    pub shader_dir: Option<PathBuf>,
    pub readback_timeout: Duration,
    pub release: ReleaseMode,
    pub kernels: KernelFamily,
    pub power: PowerMode,
    /// Request the software fallback adapter.
    pub force_fallback_adapter: bool,
}

impl Default for DftConfig {
    fn default() -> Self {
        Self {
            shader_dir: None,
            readback_timeout: DEFAULT_READBACK_TIMEOUT,
            release: ReleaseMode::default(),
            kernels: KernelFamily::default(),
            power: PowerMode::default(),
            force_fallback_adapter: false,
        }
    }
}

impl DftConfig {
    /// Builds a configuration snapshot from environment variables.
    ///
    /// Unrecognised values are reported and replaced by their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let shader_dir = std::env::var(SHADER_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let readback_timeout = match std::env::var(READBACK_TIMEOUT_ENV) {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    warn!(value = %raw, "ignoring invalid {READBACK_TIMEOUT_ENV}");
                    defaults.readback_timeout
                }
            },
            Err(_) => defaults.readback_timeout,
        };

        let release = parse_env(RELEASE_ENV, defaults.release, |v| match v {
            "retained" => Some(ReleaseMode::Retained),
            "wait_idle" | "wait-idle" => Some(ReleaseMode::WaitIdle),
            _ => None,
        });

        let kernels = parse_env(KERNELS_ENV, defaults.kernels, |v| match v {
            "directional" => Some(KernelFamily::Directional),
            "forward_only" | "forward-only" => Some(KernelFamily::ForwardOnly),
            _ => None,
        });

        let power = parse_env(POWER_ENV, defaults.power, |v| match v {
            "high" => Some(PowerMode::HighPerformance),
            "low" => Some(PowerMode::LowPower),
            _ => None,
        });

        let force_fallback_adapter = parse_env(FALLBACK_ADAPTER_ENV, false, |v| match v {
            "1" | "true" | "on" => Some(true),
            "0" | "false" | "off" => Some(false),
            _ => None,
        });

        Self {
            shader_dir,
            readback_timeout,
            release,
            kernels,
            power,
            force_fallback_adapter,
        }
    }
}

fn parse_env<T: Copy>(key: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
    match std::env::var(key) {
        Ok(raw) => {
            let normalised = raw.trim().to_ascii_lowercase();
            parse(normalised.as_str()).unwrap_or_else(|| {
                warn!(value = %raw, "ignoring unrecognised {key}");
                default
            })
        }
        Err(_) => default,
    }
}

static CONFIG: OnceLock<DftConfig> = OnceLock::new();

/// Returns the lazily initialised process configuration.
pub fn config() -> &'static DftConfig {
    CONFIG.get_or_init(DftConfig::from_env)
}

/// Installs `cfg` as the process configuration unless one was already
/// resolved, returning whichever configuration is active.
pub fn configure(cfg: DftConfig) -> &'static DftConfig {
    CONFIG.get_or_init(|| cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
    use std::sync::{Mutex, OnceLock};

    const ALL_VARS: &[&str] = &[
        SHADER_DIR_ENV,
        READBACK_TIMEOUT_ENV,
        RELEASE_ENV,
        KERNELS_ENV,
        POWER_ENV,
        FALLBACK_ADAPTER_ENV,
    ];

    fn with_env(vars: &[(&str, Option<&str>)], test: impl FnOnce()) {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        let _lock = GUARD
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut all: Vec<(&str, Option<&str>)> = ALL_VARS.iter().map(|k| (*k, None)).collect();
        for (key, value) in vars {
            if let Some(slot) = all.iter_mut().find(|(k, _)| k == key) {
                slot.1 = *value;
            }
        }

        let snapshot: Vec<(String, Option<String>)> = all
            .iter()
            .map(|(key, value)| {
                let previous = std::env::var(key).ok();
                match value {
                    Some(val) => std::env::set_var(key, val),
                    None => std::env::remove_var(key),
                }
                ((*key).to_string(), previous)
            })
            .collect();

        let result = catch_unwind(AssertUnwindSafe(test));

        for (key, value) in snapshot {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }

        if let Err(err) = result {
            resume_unwind(err);
        }
    }

    #[test]
    fn configure_keeps_the_first_installed_config() {
        let first = DftConfig {
            readback_timeout: Duration::from_millis(1234),
            ..DftConfig::default()
        };
        let second = DftConfig {
            readback_timeout: Duration::from_millis(5678),
            release: ReleaseMode::WaitIdle,
            ..DftConfig::default()
        };
        let installed = configure(first.clone());
        assert_eq!(installed, &first);
        let again = configure(second);
        assert!(std::ptr::eq(installed, again));
        assert_eq!(config(), &first);
    }

    #[test]
    fn empty_environment_yields_defaults() {
        with_env(&[], || {
            assert_eq!(DftConfig::from_env(), DftConfig::default());
        });
    }

    #[test]
    fn explicit_values_override_defaults() {
        with_env(
            &[
                (SHADER_DIR_ENV, Some("/opt/kernels")),
                (READBACK_TIMEOUT_ENV, Some("1500")),
                (RELEASE_ENV, Some("wait_idle")),
                (KERNELS_ENV, Some("Forward-Only")),
                (POWER_ENV, Some("LOW")),
                (FALLBACK_ADAPTER_ENV, Some("on")),
            ],
            || {
                let cfg = DftConfig::from_env();
                assert_eq!(cfg.shader_dir, Some(PathBuf::from("/opt/kernels")));
                assert_eq!(cfg.readback_timeout, Duration::from_millis(1500));
                assert_eq!(cfg.release, ReleaseMode::WaitIdle);
                assert_eq!(cfg.kernels, KernelFamily::ForwardOnly);
                assert_eq!(cfg.power, PowerMode::LowPower);
                assert!(cfg.force_fallback_adapter);
            },
        );
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        with_env(&[(READBACK_TIMEOUT_ENV, Some("0"))], || {
            let cfg = DftConfig::from_env();
            assert_eq!(cfg.readback_timeout, DEFAULT_READBACK_TIMEOUT);
        });
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        with_env(
            &[
                (READBACK_TIMEOUT_ENV, Some("soon")),
                (RELEASE_ENV, Some("eventually")),
                (KERNELS_ENV, Some("radix4")),
                (FALLBACK_ADAPTER_ENV, Some("maybe")),
            ],
            || {
                assert_eq!(DftConfig::from_env(), DftConfig::default());
            },
        );
    }

    #[test]
    fn blank_shader_dir_is_ignored() {
        with_env(&[(SHADER_DIR_ENV, Some("  "))], || {
            assert!(DftConfig::from_env().shader_dir.is_none());
        });
    }
}
