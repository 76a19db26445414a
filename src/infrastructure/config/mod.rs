//! Environment and registry backed configuration, assembled once at startup.

use figment::providers::{Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::domain::error::{AppError, Result};
use crate::domain::survey::SurveyConfig;

const DEFAULT_REGISTRY: &str = include_str!("../../../surveys.toml");

const PORTAL_LOGIN_URL: &str = "https://iicanada.org/user";
const PORTAL_BASE_URL: &str = "https://iicanada.org";
const SHAREPOINT_SITE_URL: &str = "https://balmoralaid.sharepoint.com/sites/Planner_C6xE";
const SHAREPOINT_FOLDER_URL: &str = "/sites/Planner_C6xE/Power%20BI%20Dashboard/Survey%202021-05/";
const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

/// Bounded wait for a page element to become visible.
const ELEMENT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct Settings {
    pub portal: PortalConfig,
    pub browser: BrowserConfig,
    pub sharepoint: SharePointConfig,
    pub telegram: TelegramConfig,
    pub surveys: Vec<SurveyConfig>,
}

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub login_url: String,
    pub base_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub server_url: String,
    pub element_timeout: Duration,
    pub headless: bool,
}

#[derive(Debug, Clone)]
pub struct SharePointConfig {
    pub site_url: String,
    pub folder_url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_id: String,
    pub api_hash: String,
    pub bot_token: String,
    pub chat_id: i64,
}

impl Settings {
    /// Read all required settings from the process environment. Every missing
    /// variable is reported in one error, before any network activity.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut missing: Vec<&str> = Vec::new();
        let mut require = |name: &'static str| -> String {
            match lookup(name).filter(|value| !value.is_empty()) {
                Some(value) => value,
                None => {
                    missing.push(name);
                    String::new()
                }
            }
        };

        let portal_username = require("SURVEY_USERNAME");
        let portal_password = require("SURVEY_PASSWORD");
        let tg_api_id = require("TG_API_ID");
        let tg_api_hash = require("TG_API_HASH");
        let tg_bot_token = require("TG_BOT_TOKEN");
        let tg_group_id = require("TG_GROUP_ID");

        if !missing.is_empty() {
            return Err(AppError::Config(format!(
                "missing environment variables: {}",
                missing.join(", ")
            )));
        }

        let chat_id = tg_group_id
            .parse::<i64>()
            .map_err(|e| AppError::Config(format!("TG_GROUP_ID must be numeric: {}", e)))?;

        let server_url =
            lookup("WEBDRIVER_URL").unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string());
        Url::parse(&server_url)
            .map_err(|e| AppError::Config(format!("invalid WEBDRIVER_URL: {}", e)))?;

        let surveys = match lookup("SURVEY_REGISTRY") {
            Some(path) => load_registry_file(Path::new(&path))?,
            None => parse_registry(DEFAULT_REGISTRY)?,
        };

        Ok(Settings {
            portal: PortalConfig {
                login_url: PORTAL_LOGIN_URL.to_string(),
                base_url: PORTAL_BASE_URL.to_string(),
                username: portal_username.clone(),
                password: portal_password.clone(),
            },
            browser: BrowserConfig {
                server_url,
                element_timeout: Duration::from_secs(ELEMENT_TIMEOUT_SECS),
                headless: true,
            },
            sharepoint: SharePointConfig {
                site_url: SHAREPOINT_SITE_URL.to_string(),
                folder_url: SHAREPOINT_FOLDER_URL.to_string(),
                username: portal_username,
                password: portal_password,
            },
            telegram: TelegramConfig {
                api_id: tg_api_id,
                api_hash: tg_api_hash,
                bot_token: tg_bot_token,
                chat_id,
            },
            surveys,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    surveys: Vec<SurveyConfig>,
}

/// Parse a TOML survey registry from a string.
pub fn parse_registry(toml: &str) -> Result<Vec<SurveyConfig>> {
    let registry: RegistryFile = Figment::from(Toml::string(toml))
        .extract()
        .map_err(|e| AppError::Config(format!("invalid survey registry: {}", e)))?;
    if registry.surveys.is_empty() {
        return Err(AppError::Config("survey registry is empty".to_string()));
    }
    Ok(registry.surveys)
}

pub fn load_registry_file(path: &Path) -> Result<Vec<SurveyConfig>> {
    let registry: RegistryFile = Figment::from(Toml::file(path))
        .extract()
        .map_err(|e| {
            AppError::Config(format!(
                "invalid survey registry {}: {}",
                path.display(),
                e
            ))
        })?;
    if registry.surveys.is_empty() {
        return Err(AppError::Config(format!(
            "survey registry {} is empty",
            path.display()
        )));
    }
    Ok(registry.surveys)
}
