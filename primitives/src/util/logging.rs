use slog::{o, Drain, Level, LevelFilter, Logger};

pub use slog_async::Async;
pub use slog_term::TermDecorator;

use crate::config::Environment;

/// Builds the root [`Logger`] of a binary.
///
/// Records go through a compact terminal format and an async drain and are
/// tagged with `"service" => service`. Production drops `Debug` and `Trace`.
pub fn new_logger(service: &str, environment: Environment) -> Logger {
    let level = match environment {
        Environment::Development => Level::Debug,
        Environment::Production => Level::Info,
    };

    let decorator = TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = LevelFilter::new(drain, level).fuse();
    let drain = Async::new(drain).build().fuse();

    Logger::root(drain, o!("service" => service.to_owned()))
}
