//! Process-wide configuration, sourced from the environment.

use std::path::PathBuf;

use once_cell::sync::OnceCell;

static CONFIG: OnceCell<BotConfig> = OnceCell::new();

/// Configuration loaded once at startup and read thereafter without locking.
#[derive(Clone, Debug)]
pub struct BotConfig {
    pub discord_token: String,
    pub track_cache_dir: PathBuf,
    pub database_path: PathBuf,
    pub pid_lock_path: PathBuf,
    pub youtube_proxy: Option<String>,
    pub youtube_cookies: Option<PathBuf>,
}

impl BotConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let discord_token =
            std::env::var("DISCORD_TOKEN").map_err(|_| ConfigError::MissingToken)?;

        let track_cache_dir = std::env::var("TRACK_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".tracks"));

        let database_path = std::env::var("BOT_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("bot.sqlite3"));

        let pid_lock_path = std::env::var("BOT_PID_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".bot.pid"));

        let youtube_proxy = std::env::var("YOUTUBE_PROXY").ok();
        let youtube_cookies = std::env::var("YOUTUBE_COOKIES").ok().map(PathBuf::from).or_else(|| {
            let local = PathBuf::from("cookies.txt");
            local.exists().then_some(local)
        });

        Ok(Self {
            discord_token,
            track_cache_dir,
            database_path,
            pid_lock_path,
            youtube_proxy,
            youtube_cookies,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DISCORD_TOKEN is not set")]
    MissingToken,
}

/// Loads and pins the process-wide configuration. Must be called exactly once,
/// before any component that calls [`config`] runs.
pub fn init() -> Result<&'static BotConfig, ConfigError> {
    let cfg = BotConfig::from_env()?;
    Ok(CONFIG.get_or_init(|| cfg))
}

/// Reads the process-wide configuration.
///
/// # Panics
/// Panics if [`init`] has not yet run; this is only ever called after startup.
pub fn config() -> &'static BotConfig {
    CONFIG.get().expect("config::init was not called before config::config")
}
