//! Process setup shared by the server and the admin CLI.

use tracing_subscriber::EnvFilter;

/// Loads `.env` from the working directory, falling back to the crate root.
pub fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

/// Installs the fmt subscriber. `RUST_LOG` wins over `default_filter`.
/// Output goes to stderr so CLI reports on stdout stay clean.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    tracing_subscriber::registry()
        .with(env_filter(default_filter))
        .with(fmt_layer)
        .init();
}

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_default_keeps_audit_write_failures() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = env_filter("warn,shelfguard=info").to_string();
        assert!(filter.contains("shelfguard=info"), "{filter}");
        assert!(filter.contains("warn"), "{filter}");
    }
}
