use nfcctl_driver::DriverConfig;

/// Server configuration, read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// Use short settle and grace timings for the simulated controller
    pub fast_timings: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            bind_address: lookup("NFCCTL_BIND").unwrap_or_else(|| "0.0.0.0:3000".into()),
            fast_timings: lookup("NFCCTL_FAST_TIMINGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        if self.fast_timings {
            DriverConfig::fast()
        } else {
            DriverConfig::default()
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
