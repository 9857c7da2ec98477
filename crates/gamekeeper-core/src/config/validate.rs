//! Configuration validation.
//!
//! Validation separates hard errors (the fleet cannot run) from warnings
//! (degraded but workable). A first-run document produces errors too; the
//! host decides whether that means "launch the setup flow" or "exit
//! non-zero".

use std::path::Path;

use super::Config;

/// One finding from validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub message: String,
}

/// All findings from one validation pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(ValidationIssue {
            field,
            message: message.into(),
        });
    }

    fn warn(&mut self, field: &'static str, message: impl Into<String>) {
        self.warnings.push(ValidationIssue {
            field,
            message: message.into(),
        });
    }
}

/// Validate a configuration document.
pub fn validate(config: &Config) -> ValidationReport {
    let mut report = ValidationReport::default();
    let hon = &config.hon_data;

    if hon.login.is_empty() {
        report.error("svr_login", "server login is required");
    }
    if hon.password.is_empty() {
        report.error("svr_password", "server password is required");
    }
    if hon.install_directory.is_empty() {
        report.error("hon_install_directory", "install directory is required");
    } else if !Path::new(&hon.install_directory).is_dir() {
        report.warn(
            "hon_install_directory",
            format!("install directory does not exist: {}", hon.install_directory),
        );
    }

    if hon.total_servers == 0 {
        report.error("svr_total", "at least one server must be configured");
    }
    if hon.total_servers > 100 {
        report.warn(
            "svr_total",
            format!("{} servers on one host is unusually high", hon.total_servers),
        );
    }
    if hon.max_concurrent_starts == 0 {
        report.warn(
            "svr_max_concurrent_starts",
            "zero concurrent starts would stall startup; the default of 5 will be used",
        );
    }

    if hon.starting_game_port < 1024 {
        report.error(
            "svr_starting_gamePort",
            format!("game port {} is privileged", hon.starting_game_port),
        );
    }
    if hon.manager_port < 1024 {
        report.error(
            "svr_managerPort",
            format!("manager port {} is privileged", hon.manager_port),
        );
    }

    // The game/voice port ranges must not collide with the manager port.
    let last_game_port = hon.starting_game_port as usize + hon.total_servers.saturating_sub(1);
    if (hon.starting_game_port as usize..=last_game_port).contains(&(hon.manager_port as usize)) {
        report.error(
            "svr_managerPort",
            "manager port falls inside the game port range",
        );
    }

    if hon.name.is_empty() {
        report.warn("svr_name", "server name is empty; instances will be unnamed");
    }

    let log_level = &config.application_data.logging.level;
    if !matches!(
        log_level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        report.warn("logging.level", format!("unknown log level {log_level:?}"));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Config {
        let mut config = Config::default();
        config.hon_data.login = "operator".into();
        config.hon_data.password = "secret".into();
        config.hon_data.install_directory = "/".into();
        config.hon_data.name = "Test".into();
        config
    }

    #[test]
    fn complete_config_is_valid() {
        let report = validate(&configured());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
    }

    #[test]
    fn empty_credentials_are_errors() {
        let report = validate(&Config::default());
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.field == "svr_login"));
        assert!(report.errors.iter().any(|e| e.field == "svr_password"));
    }

    #[test]
    fn manager_port_inside_game_range_is_an_error() {
        let mut config = configured();
        config.hon_data.starting_game_port = 11235;
        config.hon_data.total_servers = 10;
        config.hon_data.manager_port = 11240;
        let report = validate(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| e.field == "svr_managerPort" && e.message.contains("range")));
    }

    #[test]
    fn zero_servers_is_an_error() {
        let mut config = configured();
        config.hon_data.total_servers = 0;
        assert!(!validate(&config).is_valid());
    }

    #[test]
    fn unknown_log_level_is_a_warning() {
        let mut config = configured();
        config.application_data.logging.level = "loud".into();
        let report = validate(&config);
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.field == "logging.level"));
    }
}
