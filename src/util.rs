use std::path::PathBuf;

use crate::config::MonitoringConfig;

const BASE_URL: &str = "MONITORING_BASE_URL";

const ALERT_LOG: &str = "MONITORING_ALERT_LOG";

const WEBHOOK_URL: &str = "MONITORING_WEBHOOK_URL";

pub fn get_base_url() -> Option<String> {
    std::env::var(BASE_URL).ok().filter(|url| !url.is_empty())
}

pub fn get_alert_log() -> Option<PathBuf> {
    std::env::var(ALERT_LOG)
        .ok()
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

pub fn get_webhook_url() -> Option<String> {
    std::env::var(WEBHOOK_URL).ok().filter(|url| !url.is_empty())
}

/// Apply environment overrides on top of a loaded configuration
pub fn apply_env_overrides(mut config: MonitoringConfig) -> MonitoringConfig {
    if let Some(base_url) = get_base_url() {
        config.base_url = base_url;
    }

    if let Some(path) = get_alert_log() {
        config.alert_log_path = path;
    }

    if let Some(url) = get_webhook_url() {
        config.webhook_url = Some(url);
    }

    config
}
