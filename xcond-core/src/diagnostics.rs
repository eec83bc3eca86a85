use std::env;

/// Per-solve phase logging, configured from the environment.
///
/// `XCOND_DIAGNOSTICS` enables it (anything but `0`/`false`),
/// `XCOND_DIAGNOSTICS_EVERY` logs only every n-th solve.
#[derive(Debug, Clone)]
pub struct DiagnosticsConfig {
    pub enabled: bool,
    pub every: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            every: 1,
        }
    }
}

impl DiagnosticsConfig {
    pub fn from_env() -> Self {
        let enabled = match env::var("XCOND_DIAGNOSTICS") {
            Ok(v) => v != "0" && v.to_lowercase() != "false",
            Err(_) => false,
        };

        let every = env::var("XCOND_DIAGNOSTICS_EVERY")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(1);

        Self { enabled, every }
    }

    #[inline]
    pub fn should_log(&self, solve: u64) -> bool {
        self.enabled && (solve % self.every == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_log_respects_stride() {
        let diag = DiagnosticsConfig {
            enabled: true,
            every: 3,
        };
        assert!(diag.should_log(0));
        assert!(!diag.should_log(1));
        assert!(diag.should_log(6));
        assert!(!DiagnosticsConfig::default().should_log(0));
    }
}
