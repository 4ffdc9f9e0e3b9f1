//! Process-wide logging setup.

use std::env;
use std::io::{self, IsTerminal};

use log::LevelFilter;

use crate::{ColorOption, CommonOpts};

/// Resolve the log level from flags. `instance_debug` raises the default to
/// debug when any instance asks for it.
pub fn effective_log_level(common: &CommonOpts, instance_debug: bool) -> LevelFilter {
    if common.quiet {
        LevelFilter::Off
    } else if common.trace {
        LevelFilter::Trace
    } else if common.debug {
        LevelFilter::Debug
    } else {
        match common.verbose {
            0 if instance_debug => LevelFilter::Debug,
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

pub fn init_logging(common: &CommonOpts, level: LevelFilter) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    if level == LevelFilter::Off {
        log::set_max_level(LevelFilter::Off);
        return;
    }

    let name = level.as_str().to_ascii_lowercase();
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wsrelay={name},tower_http={name}")));

    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(use_color(common)))
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(level);
    builder.try_init().ok();
}

fn use_color(common: &CommonOpts) -> bool {
    let force_color =
        matches!(common.color, ColorOption::Always) || env::var_os("FORCE_COLOR").is_some();
    let disable_color = common.no_color
        || matches!(common.color, ColorOption::Never)
        || env::var_os("NO_COLOR").is_some()
        || (!force_color && !io::stderr().is_terminal());
    !disable_color
}
