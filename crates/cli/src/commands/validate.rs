//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::ControllerBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    intersection_count: usize,
    phase_group_count: usize,
    observer_count: usize,
}

impl ValidationResult {
    fn invalid(config_path: String, error: String) -> Self {
        Self {
            valid: false,
            config_path,
            error: Some(error),
            warnings: Vec::new(),
            summary: None,
        }
    }
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        let error = format!("File not found: {}", config_path);
        return ValidationResult::invalid(config_path, error);
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => ValidationResult {
            valid: true,
            config_path,
            error: None,
            warnings: collect_warnings(&blueprint),
            summary: Some(ConfigSummary {
                version: format!("{:?}", blueprint.version),
                intersection_count: blueprint.intersections.len(),
                phase_group_count: blueprint
                    .intersections
                    .iter()
                    .map(|i| i.phase_groups.len())
                    .sum(),
                observer_count: blueprint.observers.len(),
            }),
        },
        Err(e) => ValidationResult::invalid(config_path, e.to_string()),
    }
}

/// Non-fatal configuration issues
fn collect_warnings(blueprint: &ControllerBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.observers.is_empty() {
        warnings.push("No observers configured - push messages will not leave the process".into());
    }

    if blueprint.detection.auto_alert && blueprint.detection.emergency_classes.is_empty() {
        warnings.push(
            "detection.auto_alert is set but detection.emergency_classes is empty".into(),
        );
    }

    for intersection in &blueprint.intersections {
        if intersection.timing.density_factor_s == 0.0 {
            warnings.push(format!(
                "Intersection '{}' has density_factor_s = 0 - greens ignore vehicle counts",
                intersection.id
            ));
        }
        for group in &intersection.phase_groups {
            if intersection.timing.base_duration_s > group.max_green_s {
                warnings.push(format!(
                    "Intersection '{}' group '{}': base_duration_s exceeds max_green_s, \
                     green is always capped",
                    intersection.id, group.name
                ));
            }
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Intersections: {}", summary.intersection_count);
            println!("  Phase groups: {}", summary.phase_group_count);
            println!("  Observers: {}", summary.observer_count);
        }

        if !result.warnings.is_empty() {
            println!("\n⚠ Warnings:");
            for warning in &result.warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
