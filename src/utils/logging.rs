use std::fs::OpenOptions;
use std::path::Path;

use env_logger::Target;

/// Set up `log` through env_logger. `RUST_LOG` still applies on top of `level`.
pub fn init(level: log::LevelFilter, log_file: Option<&Path>) {
    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(level);
    builder.target(log_target(log_file));
    builder.init();
}

/// Append to `log_file` when it can be opened, stderr otherwise.
pub fn log_target(log_file: Option<&Path>) -> Target {
    let path = match log_file {
        Some(path) => path,
        None => return Target::Stderr,
    };
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Target::Pipe(Box::new(file)),
        Err(e) => {
            eprintln!("Cannot open log file {}: {}, logging to stderr", path.display(), e);
            Target::Stderr
        }
    }
}
