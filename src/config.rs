//! Configuration for Cropgate
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Cropgate - crop pest and disease diagnosis gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "cropgate")]
#[command(about = "Quota-enforced gateway to a crop diagnosis vision model")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI (account entitlement documents)
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "cropgate")]
    pub mongodb_db: String,

    /// Diagnosis oracle endpoint (chat-completions compatible)
    #[arg(
        long,
        env = "ORACLE_URL",
        default_value = "https://api.openai.com/v1/chat/completions"
    )]
    pub oracle_url: String,

    /// API key for the diagnosis oracle (required outside dev mode)
    #[arg(long, env = "ORACLE_API_KEY")]
    pub oracle_api_key: Option<String>,

    /// Model identifier sent to the oracle
    #[arg(long, env = "ORACLE_MODEL", default_value = "gpt-4o-mini")]
    pub oracle_model: String,

    /// Free diagnoses for anonymous (guest) devices
    #[arg(long, env = "GUEST_LIMIT", default_value = "3")]
    pub guest_limit: u32,

    /// Free diagnoses for signed-in, unpaid accounts
    #[arg(long, env = "ACCOUNT_LIMIT", default_value = "10")]
    pub account_limit: u32,

    /// Most-recent history entries kept per identity
    #[arg(long, env = "MAX_HISTORY_ITEMS", default_value = "20")]
    pub max_history_items: usize,

    /// Byte capacity for one persisted history ledger; writes beyond this
    /// degrade by stripping image attachments before retrying
    #[arg(long, env = "HISTORY_CAPACITY_BYTES", default_value = "5000000")]
    pub history_capacity_bytes: usize,

    /// Directory for device-local state (guest counters, history ledgers)
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Organization name a payment webhook event must carry to be honored
    #[arg(long, env = "WEBHOOK_ORGANIZATION", default_value = "Cropgate")]
    pub webhook_organization: String,

    /// Enable development mode (oracle key optional, simulate-payment route enabled)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration, returning a description of the first problem found
    pub fn validate(&self) -> Result<(), String> {
        if self.guest_limit == 0 {
            return Err("GUEST_LIMIT must be positive".to_string());
        }
        if self.account_limit == 0 {
            return Err("ACCOUNT_LIMIT must be positive".to_string());
        }
        if self.max_history_items == 0 {
            return Err("MAX_HISTORY_ITEMS must be positive".to_string());
        }
        if !self.dev_mode && self.oracle_api_key.as_deref().unwrap_or("").is_empty() {
            return Err("ORACLE_API_KEY is required outside dev mode".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from(["cropgate", "--oracle-api-key", "sk-test", "--dev-mode"])
    }

    #[test]
    fn default_args_validate() {
        assert!(base_args().validate().is_ok());
    }

    #[test]
    fn zero_guest_limit_rejected() {
        let mut args = base_args();
        args.guest_limit = 0;
        assert!(args.validate().is_err());
    }

    #[test]
    fn missing_oracle_key_rejected_outside_dev_mode() {
        let mut args = base_args();
        args.dev_mode = false;
        args.oracle_api_key = None;
        assert!(args.validate().is_err());
    }
}
