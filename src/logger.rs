//! log4rs setup. Every `init*` function returns `Ok(false)` instead of failing
//! when a logger is already installed.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Deserializers, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::LoggingConfig;
use crate::errors::DbError;

pub const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
pub const REPLICATION_TARGET: &str = "aqlbridge::replication";
const ROLL_BYTES: u64 = 10 * 1024 * 1024;
const ROLL_WINDOW: u32 = 7;

/// Initializes logging from `log4rs.yaml` in the working directory. A missing
/// file leaves logging uninitialized.
///
/// # Errors
/// Returns `Config` if the file exists but cannot be parsed.
pub fn init() -> Result<bool, DbError> {
    let path = Path::new("log4rs.yaml");
    if !path.exists() {
        return Ok(false);
    }
    init_path(path)
}

/// # Errors
/// Returns `Config` if the file cannot be read or parsed.
pub fn init_path(path: &Path) -> Result<bool, DbError> {
    let config = log4rs::config::load_config_file(path, Deserializers::default())
        .map_err(|e| DbError::Config(format!("{}: {e}", path.display())))?;
    install(config)
}

/// Stderr logging at `level`.
///
/// # Errors
/// Returns `Config` if the log4rs configuration is rejected.
pub fn init_console(level: LevelFilter) -> Result<bool, DbError> {
    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .build(Root::builder().appender("console").build(level))
        .map_err(|e| DbError::Config(e.to_string()))?;
    install(config)
}

/// Rolling files under `dir`: `{name}.log` for everything and
/// `{name}_replication.log` for the change listener.
///
/// # Errors
/// Returns `Io` if `dir` cannot be created, `Config` if an appender cannot be
/// built.
pub fn init_in(dir: &Path, name: &str) -> Result<bool, DbError> {
    init_rolling(dir, name, LevelFilter::Info)
}

fn init_rolling(dir: &Path, name: &str, level: LevelFilter) -> Result<bool, DbError> {
    std::fs::create_dir_all(dir)?;
    let app = rolling(dir, name)?;
    let replication = rolling(dir, &format!("{name}_replication"))?;
    let config = Config::builder()
        .appender(Appender::builder().build("app", Box::new(app)))
        .appender(Appender::builder().build("replication", Box::new(replication)))
        .logger(Logger::builder().appender("replication").additive(false).build(REPLICATION_TARGET, level))
        .build(Root::builder().appender("app").build(level))
        .map_err(|e| DbError::Config(e.to_string()))?;
    install(config)
}

fn rolling(dir: &Path, stem: &str) -> Result<RollingFileAppender, DbError> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", dir.join(format!("{stem}.{{}}.log")).display()), ROLL_WINDOW)
        .map_err(|e| DbError::Config(e.to_string()))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_BYTES)), Box::new(roller));
    RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(dir.join(format!("{stem}.log")), Box::new(policy))
        .map_err(|e| DbError::Io(e.to_string()))
}

/// Picks a setup from `[logging]`: a log4rs file, then a log directory, then
/// the console.
///
/// # Errors
/// See [`init_path`] and [`init_in`].
pub fn init_from_config(cfg: &LoggingConfig) -> Result<bool, DbError> {
    let level = parse_level(&cfg.level);
    match (&cfg.config_file, &cfg.log_dir) {
        (Some(file), _) => init_path(file),
        (None, Some(dir)) => init_rolling(dir, "aqlbridge", level),
        (None, None) => init_console(level),
    }
}

/// Unknown names fall back to `Info`.
#[must_use]
pub fn parse_level(s: &str) -> LevelFilter {
    match s.trim().to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

fn install(config: Config) -> Result<bool, DbError> {
    match log4rs::init_config(config) {
        Ok(_) => Ok(true),
        Err(e) => {
            log::debug!("logger already installed: {e}");
            Ok(false)
        }
    }
}
