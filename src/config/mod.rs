use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub workshops: WorkshopConfig,
    #[serde(default)]
    pub invitations: InvitationConfig,
    #[serde(default)]
    pub refunds: RefundConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Bearer token coordinators present on admin routes
    pub coordinator_token: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkshopConfig {
    pub default_cool_off_days: i64,
    /// How many days before the start onboarding tokens go out
    pub onboarding_lead_days: i64,
    /// Check-in opens this many hours before the start and closes at the end
    pub checkin_window_hours: i64,
    pub session_ttl_hours: i64,
    /// Follow-ups are only sent for workshops finished within this many days
    pub follow_up_window_days: i64,
    pub currency: String,
}

impl Default for WorkshopConfig {
    fn default() -> Self {
        Self {
            default_cool_off_days: 5,
            onboarding_lead_days: 2,
            checkin_window_hours: 4,
            session_ttl_hours: 24,
            follow_up_window_days: 14,
            currency: "usd".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InvitationConfig {
    /// Whether someone who cancelled may be invited again to the same workshop
    pub reinvite_cancelled: bool,
    /// Candidates with a no-show this recent are skipped
    pub no_show_exclusion_days: i64,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            reinvite_cancelled: false,
            no_show_exclusion_days: 90,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RefundConfig {
    #[serde(default)]
    pub allow_partial: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub top_up_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub finalize_interval_secs: u64,
    pub onboarding_interval_secs: u64,
    pub follow_up_interval_secs: u64,
    pub refund_retry_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_up_interval_secs: 6 * 3600,
            sweep_interval_secs: 3600,
            finalize_interval_secs: 3600,
            onboarding_interval_secs: 3600,
            follow_up_interval_secs: 24 * 3600,
            refund_retry_interval_secs: 6 * 3600,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:8080")?
            .set_default("database.url", "sqlite://workshops.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("stripe.enabled", false)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with WORKSHOPS__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("WORKSHOPS").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://workshops.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            auth: AuthConfig {
                coordinator_token: "change-me-in-production".to_string(),
            },
            stripe: StripeConfig::default(),
            workshops: WorkshopConfig::default(),
            invitations: InvitationConfig::default(),
            refunds: RefundConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}
