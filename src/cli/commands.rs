use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ai::{infer_mapping, FormMapping, GeminiClient};
use crate::browser::{SessionFactory, WebDriverSessionFactory};
use crate::captcha::ConsolePrompt;
use crate::cli::config::FillerConfig;
use crate::cli::{AnalyzeArgs, RunArgs};
use crate::error::RunError;
use crate::form::{identity_column_mapping, Record};
use crate::runner::{discover_slot_options, generate_tasks, Orchestrator, RunReport, RunSettings, WorkerContext};
use crate::storage::{export_as_json, Dataset};

/// Load the named profile, or the default configuration
fn load_config(profile: Option<&str>) -> Result<FillerConfig> {
    let mut config = match profile {
        Some(name) => FillerConfig::load_profile(name)
            .context(format!("Failed to load profile: {}", name))?,
        None => FillerConfig::load_default()?,
    };
    config.apply_env();
    Ok(config)
}

/// Command line values take precedence over the profile
fn apply_run_overrides(config: &mut FillerConfig, args: &RunArgs) {
    if let Some(url) = &args.url {
        config.form.url = Some(url.clone());
    }
    if let Some(pool_size) = args.pool_size {
        config.runner.pool_size = pool_size;
    }
    if args.headless {
        config.runner.headless = true;
    }
    if let Some(keep) = args.keep_failed {
        config.runner.keep_failed_session = keep;
    }
    if args.solve {
        config.solver.enabled = true;
    }
    if !args.api_keys.is_empty() {
        config.solver.api_keys = args.api_keys.clone();
    }
    if let Some(session) = &args.session {
        config.form.session = Some(session.clone());
    }
}

/// Load the target page once through a headless session and return its markup
async fn fetch_page(factory: &dyn SessionFactory, url: &str) -> Result<String> {
    let mut session = factory.open(true).await?;

    let result = match session.navigate(url).await {
        Ok(()) => session.page_source().await,
        Err(e) => Err(e),
    };

    if let Err(e) = session.close().await {
        warn!("Failed to close analysis session: {}", e);
    }

    result.context(format!("Failed to load {}", url))
}

/// Use the profile's field map when it has one, otherwise ask the inference service
async fn resolve_mapping(
    config: &FillerConfig,
    factory: &dyn SessionFactory,
    client: &GeminiClient,
    url: &str,
    columns: &[String],
) -> Result<FormMapping> {
    let mut mapping = if config.form.field_map.is_empty() {
        info!("No field map configured, inferring one from the page");
        let html = fetch_page(factory, url)
            .await
            .map_err(|e| RunError::Configuration(format!("{:#}", e)))?;

        infer_mapping(client, &config.solver.api_keys, &html, columns)
            .await
            .map_err(|e| RunError::Configuration(format!("field map inference failed: {}", e)))?
    } else {
        FormMapping {
            field_map: config.form.field_map.clone(),
            column_mapping: BTreeMap::new(),
        }
    };

    if !config.form.column_mapping.is_empty() {
        mapping.column_mapping = config.form.column_mapping.clone();
    } else if mapping.column_mapping.is_empty() {
        mapping.column_mapping = identity_column_mapping(columns);
    }

    Ok(mapping)
}

/// Submit the form for every dataset row and every available date
pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.profile.as_deref())?;
    apply_run_overrides(&mut config, &args);
    config.validate()?;

    if !args.dataset.exists() {
        return Err(RunError::Configuration(format!("dataset not found: {}", args.dataset.display())).into());
    }
    let dataset = Dataset::load(&args.dataset)?;
    if dataset.is_empty() {
        return Err(RunError::Configuration(format!("dataset is empty: {}", args.dataset.display())).into());
    }
    info!("Loaded {} rows with columns {:?}", dataset.len(), dataset.columns);

    let url = config.form.url.clone().unwrap_or_default();
    let factory: Arc<dyn SessionFactory> = Arc::new(WebDriverSessionFactory::new(config.browser.clone()));
    let client = Arc::new(GeminiClient::new(&config.solver)?);

    let mapping = resolve_mapping(&config, factory.as_ref(), client.as_ref(), &url, &dataset.columns).await?;
    info!("Using {} mapped fields", mapping.field_map.len());

    let records: Vec<Record> = dataset
        .rows
        .iter()
        .map(|row| Record::from_row(row, &mapping.column_mapping))
        .collect();

    let settings = Arc::new(RunSettings::from_config(&config, mapping.field_map)?);
    let slot_options = discover_slot_options(factory.as_ref(), &settings).await?;
    let tasks = generate_tasks(&records, &slot_options, config.form.session.as_deref(), settings)?;

    let ctx = WorkerContext {
        factory,
        recognizer: client,
        manual: Arc::new(ConsolePrompt::new()),
    };
    let orchestrator = Orchestrator::new(ctx, config.runner.pool_size);
    let report = orchestrator.run(tasks).await;

    print_report(&report);

    if let Some(path) = &args.report {
        export_as_json(&report, path)?;
        info!("Report written to: {}", path.display());
    }

    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Result: {}/{} submissions succeeded", report.succeeded, report.total);

    if report.failed() > 0 {
        println!("Failed:");
        for outcome in report.failures() {
            println!(
                "  - [task {}] {} ({}): {}",
                outcome.task_id,
                outcome.display_name,
                outcome.sales_date.as_deref().unwrap_or("-"),
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// Infer the mapping for a form and print it as profile YAML
pub async fn analyze(args: AnalyzeArgs) -> Result<()> {
    let mut config = load_config(args.profile.as_deref())?;
    if let Some(url) = &args.url {
        config.form.url = Some(url.clone());
    }
    if !args.api_keys.is_empty() {
        config.solver.api_keys = args.api_keys.clone();
    }
    if config.solver.api_keys.is_empty() {
        return Err(RunError::Configuration("no API keys configured for form analysis".to_string()).into());
    }

    let columns = match &args.dataset {
        Some(path) => Dataset::load(path)?.columns,
        None => Vec::new(),
    };

    let html = match &args.html {
        Some(path) => std::fs::read_to_string(path)
            .context(format!("Failed to read page markup: {}", path.display()))?,
        None => {
            let url = config
                .form
                .url
                .clone()
                .ok_or_else(|| RunError::Configuration("target url is missing".to_string()))?;
            let factory = WebDriverSessionFactory::new(config.browser.clone());
            fetch_page(&factory, &url).await?
        }
    };

    let client = GeminiClient::new(&config.solver)?;
    let mapping = infer_mapping(&client, &config.solver.api_keys, &html, &columns)
        .await
        .context("Form analysis failed")?;

    println!("{}", serde_yaml::to_string(&mapping).context("Failed to serialize mapping")?);

    if let Some(profile) = &args.save {
        config.form.field_map = mapping.field_map;
        config.form.column_mapping = mapping.column_mapping;
        config.save_as_profile(profile).await?;
        info!("Mapping saved to profile: {}", profile);
    }

    Ok(())
}

/// List all available configuration profiles
pub async fn list_profiles() -> Result<()> {
    let profiles = FillerConfig::list_profiles().await?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Manage a specific configuration profile
pub async fn manage_profile(profile_name: String) -> Result<()> {
    // Load the profile if it exists
    match FillerConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        },
        Err(_) => {
            // Profile doesn't exist, create a new one
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            let config = FillerConfig::default();
            config.save_as_profile(&profile_name).await?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub async fn show_config() -> Result<()> {
    let config = FillerConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_run_overrides_win_over_profile() {
        let mut config = FillerConfig::default();
        config.runner.pool_size = 8;
        config.solver.api_keys = vec!["profile-key".to_string()];

        let args = RunArgs {
            dataset: PathBuf::from("people.json"),
            url: Some("http://localhost/form".to_string()),
            pool_size: Some(2),
            headless: true,
            keep_failed: Some(false),
            solve: true,
            api_keys: vec!["cli-key".to_string()],
            session: Some("13:30".to_string()),
            ..RunArgs::default()
        };
        apply_run_overrides(&mut config, &args);

        assert_eq!(config.form.url.as_deref(), Some("http://localhost/form"));
        assert_eq!(config.runner.pool_size, 2);
        assert!(config.runner.headless);
        assert!(!config.runner.keep_failed_session);
        assert!(config.solver.enabled);
        assert_eq!(config.solver.api_keys, vec!["cli-key".to_string()]);
        assert_eq!(config.form.session.as_deref(), Some("13:30"));
    }

    #[test]
    fn test_absent_overrides_keep_profile() {
        let mut config = FillerConfig::default();
        config.runner.pool_size = 8;
        config.solver.api_keys = vec!["profile-key".to_string()];

        apply_run_overrides(&mut config, &RunArgs::default());

        assert_eq!(config.runner.pool_size, 8);
        assert!(config.runner.keep_failed_session);
        assert_eq!(config.solver.api_keys, vec!["profile-key".to_string()]);
    }
}
