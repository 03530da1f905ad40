//! Environment-based configuration, loaded the same way as the rest of the stack.

use serde::Deserialize;

fn default_aws_region() -> String {
    "us-east-1".to_string()
}

fn default_health_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    pub orders_queue_name: String,

    #[serde(default)]
    pub orders_dlq_name: Option<String>,

    #[serde(default = "default_aws_region")]
    pub aws_region: String,

    #[serde(default)]
    pub sqs_endpoint_url: Option<String>,

    #[serde(default = "default_health_port")]
    pub health_port: u16,

    #[serde(default)]
    pub sentry_dsn: Option<String>,
}

impl DemoConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env::<Self>()?)
    }
}
