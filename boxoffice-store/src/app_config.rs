use boxoffice_core::TicketType;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub email: EmailConfig,
    pub admin: AdminConfig,
    pub business_rules: BusinessRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub ipn_secret: String,
    /// Request-level timeout for every gateway call; timeouts are treated
    /// as "status unknown", not as failures.
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
    pub pay_currency: String,
}

fn default_gateway_timeout() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TicketRule {
    pub capacity: u32,
    pub price: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl_minutes: i64,
    #[serde(default = "default_resend_cooldown")]
    pub resend_cooldown_seconds: i64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    pub currency: String,
    pub two_day: TicketRule,
    pub three_day: TicketRule,
    pub vip: TicketRule,
}

fn default_reservation_ttl() -> i64 {
    15
}

fn default_resend_cooldown() -> i64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

impl BusinessRules {
    pub fn rule_for(&self, ticket_type: TicketType) -> &TicketRule {
        match ticket_type {
            TicketType::TwoDay => &self.two_day,
            TicketType::ThreeDay => &self.three_day,
            TicketType::Vip => &self.vip,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Environment-specific overrides, optional.
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, not checked in.
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("BOXOFFICE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
