//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{ControllerBlueprint, IntersectionConfig};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    detection: DetectionInfo,
    intersections: Vec<IntersectionInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    observers: Vec<ObserverInfo>,
}

#[derive(Serialize)]
struct DetectionInfo {
    confidence_threshold: f64,
    timeout_ms: u64,
    workers: usize,
    auto_alert: bool,
}

#[derive(Serialize)]
struct IntersectionInfo {
    id: String,
    next_phase: String,
    yellow_s: f64,
    base_duration_s: f64,
    density_factor_s: f64,
    override_duration_s: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    phase_groups: Vec<GroupInfo>,
}

#[derive(Serialize)]
struct GroupInfo {
    name: String,
    lanes: Vec<String>,
    min_green_s: f64,
    max_green_s: f64,
}

#[derive(Serialize)]
struct ObserverInfo {
    name: String,
    observer_type: String,
    queue_capacity: usize,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn intersection_info(intersection: &IntersectionConfig, with_groups: bool) -> IntersectionInfo {
    let phase_groups = if with_groups {
        intersection
            .phase_groups
            .iter()
            .map(|g| GroupInfo {
                name: g.name.clone(),
                lanes: g.lanes.iter().map(|l| l.as_str().to_string()).collect(),
                min_green_s: g.min_green_s,
                max_green_s: g.max_green_s,
            })
            .collect()
    } else {
        Vec::new()
    };

    let timing = &intersection.timing;
    IntersectionInfo {
        id: intersection.id.to_string(),
        next_phase: format!("{:?}", intersection.next_phase),
        yellow_s: timing.yellow_s,
        base_duration_s: timing.base_duration_s,
        density_factor_s: timing.density_factor_s,
        override_duration_s: timing.override_duration_s,
        phase_groups,
    }
}

fn build_config_info(blueprint: &ControllerBlueprint, args: &InfoArgs) -> ConfigInfo {
    let observers = if args.observers {
        blueprint
            .observers
            .iter()
            .map(|o| ObserverInfo {
                name: o.name.clone(),
                observer_type: format!("{:?}", o.observer_type),
                queue_capacity: o.queue_capacity,
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        detection: DetectionInfo {
            confidence_threshold: blueprint.detection.confidence_threshold,
            timeout_ms: blueprint.detection.timeout_ms,
            workers: blueprint.detection.workers,
            auto_alert: blueprint.detection.auto_alert,
        },
        intersections: blueprint
            .intersections
            .iter()
            .map(|i| intersection_info(i, args.groups))
            .collect(),
        observers,
    }
}

fn branch(is_last: bool) -> (&'static str, &'static str) {
    if is_last {
        ("└─", "   ")
    } else {
        ("├─", "│  ")
    }
}

fn print_config_info(blueprint: &ControllerBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 AISC Controller Configuration                ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let detection = &blueprint.detection;
    println!("Detection");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Confidence threshold: {:.2}", detection.confidence_threshold);
    println!(
        "   ├─ Inference: {} workers, {} ms timeout",
        detection.workers, detection.timeout_ms
    );
    println!(
        "   └─ Auto alert: {} (priority {})",
        detection.auto_alert, detection.auto_alert_priority
    );

    println!("\nIntersections ({})", blueprint.intersections.len());
    for (i, intersection) in blueprint.intersections.iter().enumerate() {
        let (prefix, child) = branch(i == blueprint.intersections.len() - 1);
        let timing = &intersection.timing;
        println!(
            "   {} {} ({:?}, yellow {}s, base {}s + {}s/vehicle)",
            prefix,
            intersection.id,
            intersection.next_phase,
            timing.yellow_s,
            timing.base_duration_s,
            timing.density_factor_s
        );

        if args.groups {
            for (j, group) in intersection.phase_groups.iter().enumerate() {
                let (group_prefix, _) = branch(j == intersection.phase_groups.len() - 1);
                let lanes: Vec<&str> = group.lanes.iter().map(|l| l.as_str()).collect();
                println!(
                    "   {}  {} {} [{}] green {}..{}s",
                    child,
                    group_prefix,
                    group.name,
                    lanes.join(", "),
                    group.min_green_s,
                    group.max_green_s
                );
            }
        } else {
            println!("   {}  └─ {} phase groups", child, intersection.phase_groups.len());
        }
    }

    if args.observers && !blueprint.observers.is_empty() {
        println!("\nObservers ({})", blueprint.observers.len());
        for (i, observer) in blueprint.observers.iter().enumerate() {
            let (prefix, _) = branch(i == blueprint.observers.len() - 1);
            println!(
                "   {} {} ({:?}, queue {})",
                prefix, observer.name, observer.observer_type, observer.queue_capacity
            );
        }
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint() -> ControllerBlueprint {
        let intersection = serde_json::from_str(
            r#"{"id": "main", "next_phase": "demand", "phase_groups": [
                {"name": "ns", "lanes": ["north", "south"]},
                {"name": "ew", "lanes": ["east", "west"]}]}"#,
        )
        .unwrap();
        ControllerBlueprint::with_intersections(vec![intersection])
    }

    #[test]
    fn test_info_groups_only_when_requested() {
        let mut args = InfoArgs {
            config: "aisc.toml".into(),
            json: true,
            groups: false,
            observers: false,
        };
        let info = build_config_info(&blueprint(), &args);
        assert_eq!(info.intersections[0].next_phase, "Demand");
        assert!(info.intersections[0].phase_groups.is_empty());

        args.groups = true;
        let info = build_config_info(&blueprint(), &args);
        let groups = &info.intersections[0].phase_groups;
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].lanes, vec!["east", "west"]);
    }
}
