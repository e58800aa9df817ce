// Build metadata, reported to the server in CONNECT

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Client name used when the config does not set one, e.g. `server-list/0.1.0`.
pub fn default_client_name() -> String {
    format!("{NAME}/{VERSION}")
}
