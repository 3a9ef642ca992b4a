//! Tracing subscriber setup for hosts embedding the runtime.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Emits JSON lines when `json` is true, human-readable output otherwise.
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_already_installed() {
        let _ = init_tracing(false);
        assert!(!init_tracing(true));
    }
}
