//! Diagnostic logging for the daemon itself.
//!
//! Records produced by clients go into the log buffer; this module is
//! only about the daemon's own `log::` output, which lands on stderr.

use log::LevelFilter;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LevelFilter,
    pub colored: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LevelFilter::Info,
            colored: true,
        }
    }
}

pub fn setup_logging(conf: &LoggingConfig) -> Result<(), String> {
    let colored = conf.colored;
    fern::Dispatch::new()
        .format(move |out, message, record| {
            let level = record.level();
            let level_str = if colored {
                match level {
                    log::Level::Error => format!("\x1b[31m{}\x1b[0m", level),
                    log::Level::Warn => format!("\x1b[33m{}\x1b[0m", level),
                    log::Level::Info => format!("\x1b[32m{}\x1b[0m", level),
                    log::Level::Debug => format!("\x1b[34m{}\x1b[0m", level),
                    log::Level::Trace => format!("\x1b[36m{}\x1b[0m", level),
                }
            } else {
                level.to_string()
            };
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                level_str,
                message
            ));
        })
        .level(conf.level)
        .chain(std::io::stderr())
        .apply()
        .map_err(|e| format!("Error while setting up logger: {e}"))
}
