use std::error::Error;
use std::fs::File;
use std::path::Path;

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

/// Level implied by the `-v`/`-q` flags.
pub fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::OFF;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global subscriber: compact stderr output plus an optional
/// plain-text log file.
pub fn setup_logging(
    verbosity: u8,
    quiet: bool,
    log_file: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact();

    let subscriber = tracing_subscriber::registry()
        .with(level_filter(verbosity, quiet))
        .with(stderr_layer);

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .map_err(|err| format!("cannot create log file {}: {err}", path.display()))?;
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_target(true);
            subscriber.with(file_layer).try_init()?;
        }
        None => subscriber.try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info};

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_filter(0, false), LevelFilter::WARN);
        assert_eq!(level_filter(2, false), LevelFilter::DEBUG);
        assert_eq!(level_filter(7, false), LevelFilter::TRACE);
        assert_eq!(level_filter(3, true), LevelFilter::OFF);
    }

    #[test]
    fn file_layer_receives_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let file = File::create(&path).unwrap();
        let layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_thread_ids(true);
        let subscriber = tracing_subscriber::registry()
            .with(LevelFilter::DEBUG)
            .with(layer);

        tracing::subscriber::with_default(subscriber, || {
            info!(round = 3, "sample discrepancy");
            debug!("trial evaluated");
        });

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("sample discrepancy"));
        assert!(content.contains("round=3"));
        assert!(content.contains("DEBUG"));
    }

    #[test]
    fn unwritable_log_file_is_an_error() {
        let result = setup_logging(0, true, Some(Path::new("/nonexistent-dir/run.log")));
        assert!(result.is_err());
    }
}
