use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// VOLLEY match session server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "volley-server", version, about = "VOLLEY match session server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "VOLLEY_PORT", default_value = "4224")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "VOLLEY_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./volley.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "VOLLEY_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4224,
            bind_address: "0.0.0.0".to_string(),
            config: "./volley.toml".to_string(),
            json_logs: false,
            generate_config: false,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (VOLLEY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("VOLLEY_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# VOLLEY Match Session Server Configuration
# Place this file at ./volley.toml or specify with --config <path>
# All settings can be overridden via environment variables (VOLLEY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4224)
# port = 4224

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false
"#
    .to_string()
}
