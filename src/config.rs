use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Saqtan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    format!("info,{}=debug", "saqtan_core")
}

/// Get the application data directory
/// ~/Saqtan/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join(APP_NAME)
}

/// Get the path of the locally cached profile document
pub fn profile_path() -> PathBuf {
    app_data_dir().join("data.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("Saqtan"));
    }

    #[test]
    fn profile_path_under_app_data() {
        let path = profile_path();
        let app = app_data_dir();
        assert!(path.starts_with(app));
        assert!(path.ends_with("data.json"));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.3.0");
    }
}
