use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use std::io::IsTerminal;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable naming a Chrome trace file to write alongside the
/// regular formatted output.
pub const TRACE_CHROME_ENV: &str = "ST_DFT_TRACE_CHROME";

const DEFAULT_FILTER: &str = "info";

static INITIALISED: OnceLock<()> = OnceLock::new();
static CHROME_GUARD: OnceLock<Mutex<Option<tracing_chrome::FlushGuard>>> = OnceLock::new();

/// Configures the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` and defaults to `info`. Events go to stderr so
/// stdout stays free for program output. Only binaries should call this; the
/// library crates merely emit events.
pub fn init_tracing() -> Result<(), InitError> {
    INITIALISED
        .set(())
        .map_err(|_| InitError::AlreadyInitialised)?;

    let ansi = std::io::stderr().is_terminal();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(std::io::stderr);

    match chrome_trace_path()? {
        Some(path) => {
            let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
                .file(path)
                .include_args(true)
                .build();
            keep_chrome_guard(guard);
            Registry::default()
                .with(filter)
                .with(fmt_layer)
                .with(chrome_layer)
                .init();
        }
        None => {
            Registry::default().with(filter).with(fmt_layer).init();
        }
    }

    Ok(())
}

/// Flushes the Chrome trace file, if one is being recorded.
pub fn flush_chrome_trace() {
    if let Some(cell) = CHROME_GUARD.get() {
        if let Ok(slot) = cell.lock() {
            if let Some(guard) = slot.as_ref() {
                guard.flush();
            }
        }
    }
}

fn keep_chrome_guard(guard: tracing_chrome::FlushGuard) {
    if let Some(cell) = CHROME_GUARD.get() {
        if let Ok(mut slot) = cell.lock() {
            *slot = Some(guard);
        }
    } else {
        let _ = CHROME_GUARD.set(Mutex::new(Some(guard)));
    }
}

fn chrome_trace_path() -> Result<Option<PathBuf>, InitError> {
    parse_chrome_trace_path(std::env::var(TRACE_CHROME_ENV))
}

fn parse_chrome_trace_path(
    raw: Result<String, std::env::VarError>,
) -> Result<Option<PathBuf>, InitError> {
    match raw {
        Ok(raw) if !raw.trim().is_empty() => Ok(Some(PathBuf::from(raw.trim()))),
        Ok(_) => Ok(None),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(InitError::Env(err)),
    }
}

/// Errors emitted when configuring the tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
    #[error("failed to read ST_DFT_TRACE_CHROME: {0}")]
    Env(std::env::VarError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn blank_chrome_path_disables_the_layer() {
        assert!(parse_chrome_trace_path(Ok("   ".into())).unwrap().is_none());
        assert!(parse_chrome_trace_path(Err(std::env::VarError::NotPresent))
            .unwrap()
            .is_none());
    }

    #[test]
    fn chrome_path_is_trimmed() {
        let path = parse_chrome_trace_path(Ok(" /tmp/dft.json ".into()))
            .unwrap()
            .expect("path");
        assert_eq!(path, PathBuf::from("/tmp/dft.json"));
    }

    #[test]
    fn non_unicode_value_is_reported() {
        let err = parse_chrome_trace_path(Err(std::env::VarError::NotUnicode(OsString::new())))
            .unwrap_err();
        assert!(matches!(err, InitError::Env(_)));
    }
}
