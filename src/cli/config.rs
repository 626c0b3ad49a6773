use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::browser::driver::SuccessIndicator;
use crate::error::RunError;
use crate::form::field_map::FieldMap;

/// Environment variable holding extra comma separated inference credentials
pub const API_KEYS_ENV: &str = "FILLER_API_KEYS";

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FillerConfig {
    pub form: FormSettings,
    pub runner: RunnerSettings,
    pub solver: SolverSettings,
    pub browser: BrowserSettings,
}

/// Target page settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FormSettings {
    pub url: Option<String>,
    /// Static field map; when empty the map is inferred from the page
    pub field_map: FieldMap,
    /// Logical key -> dataset column
    pub column_mapping: BTreeMap<String, Option<String>>,
    pub success_indicator: SuccessIndicator,
    /// Operator chosen value for the session dropdown
    pub session: Option<String>,
}

/// Execution settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RunnerSettings {
    pub pool_size: usize,
    pub headless: bool,
    pub keep_failed_session: bool,
    pub task_timeout_secs: u64,
    pub element_wait_secs: u64,
    pub confirmation_wait_secs: u64,
    pub settle_delay_ms: u64,
}

/// Inference settings shared by CAPTCHA solving and form analysis
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SolverSettings {
    pub enabled: bool,
    pub api_keys: Vec<String>,
    pub model: String,
    pub endpoint: String,
    pub request_timeout_secs: u64,
}

/// WebDriver settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub viewport: Viewport,
    pub page_load_timeout_secs: u64,
    pub chrome_args: Vec<String>,
}

/// Browser window size
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            url: None,
            field_map: FieldMap::new(),
            column_mapping: BTreeMap::new(),
            success_indicator: SuccessIndicator::Text("ĐĂNG KÝ THÀNH CÔNG".to_string()),
            session: None,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            pool_size: std::thread::available_parallelism()
                .map(|n| n.get().min(8))
                .unwrap_or(1),
            headless: false,
            keep_failed_session: true,
            task_timeout_secs: 300,
            element_wait_secs: 5,
            confirmation_wait_secs: 10,
            settle_delay_ms: 1000,
        }
    }
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_keys: vec![],
            model: "gemini-2.0-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            page_load_timeout_secs: 30,
            chrome_args: vec![],
        }
    }
}

/// Split a comma separated credential list, dropping blanks
pub fn parse_api_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

impl FillerConfig {
    /// Get the path to the config directory
    fn config_dir() -> PathBuf {
        let mut path = if let Some(proj_dirs) = directories::ProjectDirs::from("com", "form-filler", "form-filler") {
            proj_dirs.config_dir().to_path_buf()
        } else {
            PathBuf::from("./config")
        };

        // Create the sites directory if it doesn't exist
        path.push("sites");
        if !path.exists() {
            if let Err(e) = fs::create_dir_all(&path) {
                error!("Failed to create config directory: {}", e);
            }
        }

        // Move back up to the config directory
        path.pop();
        path
    }

    /// Load the default configuration
    pub fn load_default() -> Result<Self> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            info!("Default configuration not found. Creating...");
            let config = Self::default();
            config.save_as_default()?;
            Ok(config)
        }
    }

    /// Load a configuration profile
    pub fn load_profile(profile: &str) -> Result<Self> {
        let config_dir = Self::config_dir();
        let profile_path = config_dir.join("sites").join(format!("{}.yaml", profile));

        if profile_path.exists() {
            Self::load_from_file(&profile_path)
        } else {
            anyhow::bail!("Profile '{}' not found", profile)
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read configuration file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .context(format!("Failed to parse configuration file: {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        Ok(config)
    }

    /// Append credentials from the environment
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var(API_KEYS_ENV) {
            for key in parse_api_keys(&raw) {
                if !self.solver.api_keys.contains(&key) {
                    self.solver.api_keys.push(key);
                }
            }
        }
    }

    /// Check the settings a run depends on; a bad configuration stops the run before any task
    pub fn validate(&self) -> Result<(), RunError> {
        match self.form.url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => {
                url::Url::parse(url)
                    .map_err(|e| RunError::Configuration(format!("invalid target url '{}': {}", url, e)))?;
            }
            _ => return Err(RunError::Configuration("target url is missing".to_string())),
        }

        if self.runner.pool_size == 0 {
            return Err(RunError::Configuration("pool size must be at least 1".to_string()));
        }

        if self.solver.enabled && self.solver.api_keys.is_empty() {
            return Err(RunError::Configuration(
                "CAPTCHA solving is enabled but no API keys are configured".to_string(),
            ));
        }

        if self.form.field_map.is_empty() && self.solver.api_keys.is_empty() {
            return Err(RunError::Configuration(
                "no field map configured and no API keys to infer one".to_string(),
            ));
        }

        if self.runner.headless && !self.solver.enabled {
            warn!("Running headless without CAPTCHA solving; challenges cannot be answered manually");
        }

        Ok(())
    }

    /// Save the configuration as the default
    pub fn save_as_default(&self) -> Result<()> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("default.yaml");

        self.save_to_file(&config_path)
    }

    /// Save the configuration as a profile
    pub async fn save_as_profile(&self, profile: &str) -> Result<()> {
        let config_dir = Self::config_dir();
        let sites_dir = config_dir.join("sites");

        if !sites_dir.exists() {
            fs::create_dir_all(&sites_dir)
                .context(format!("Failed to create sites directory: {}", sites_dir.display()))?;
        }

        let profile_path = sites_dir.join(format!("{}.yaml", profile));
        self.save_to_file(&profile_path)
    }

    /// Save the configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!("Saving configuration to: {}", path.display());

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self)
            .context("Failed to serialize configuration")?;

        fs::write(path, contents)
            .context(format!("Failed to write configuration file: {}", path.display()))?;

        Ok(())
    }

    /// List all available profiles
    pub async fn list_profiles() -> Result<Vec<String>> {
        let config_dir = Self::config_dir();
        let sites_dir = config_dir.join("sites");

        if !sites_dir.exists() {
            return Ok(vec![]);
        }

        let mut profiles = Vec::new();

        for entry in fs::read_dir(sites_dir)? {
            let path = entry?.path();

            if path.is_file() && path.extension().map_or(false, |ext| ext == "yaml") {
                if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                    profiles.push(name.to_string());
                }
            }
        }

        profiles.sort();
        Ok(profiles)
    }
}
