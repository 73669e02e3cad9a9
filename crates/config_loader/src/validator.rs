//! Blueprint validation
//!
//! Field ranges are declared on the contract types (`validator` derive).
//! The cross-field rules live here:
//! - intersection ids unique and non-blank
//! - phase group names unique, lanes disjoint, min_green <= max_green
//! - emergency.recent_id_window >= 1
//! - observer names unique, network observers carry an `addr`

use std::collections::{BTreeMap, HashSet};

use contracts::{ContractError, ControllerBlueprint, IntersectionConfig, ObserverType};
use validator::Validate;

/// Validate the blueprint, returning the first error found.
pub fn validate(blueprint: &ControllerBlueprint) -> Result<(), ContractError> {
    blueprint
        .validate()
        .map_err(|e| ContractError::config_validation("blueprint", flatten(&e.to_string())))?;

    validate_intersection_ids(blueprint)?;
    for intersection in &blueprint.intersections {
        validate_phase_groups(intersection)?;
    }
    validate_emergency(blueprint)?;
    validate_observers(blueprint)?;
    Ok(())
}

fn flatten(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

fn validate_intersection_ids(blueprint: &ControllerBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, intersection) in blueprint.intersections.iter().enumerate() {
        if intersection.id.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("intersections[{idx}].id"),
                "intersection id cannot be empty",
            ));
        }
        if !seen.insert(intersection.id.as_str()) {
            return Err(ContractError::config_validation(
                format!("intersections[id={}]", intersection.id),
                "duplicate intersection id",
            ));
        }
    }
    Ok(())
}

fn validate_phase_groups(intersection: &IntersectionConfig) -> Result<(), ContractError> {
    let id = &intersection.id;
    let mut names = HashSet::new();
    let mut owner = BTreeMap::new();

    for group in &intersection.phase_groups {
        let field = format!("intersections[{id}].phase_groups[{}]", group.name);

        if !names.insert(group.name.as_str()) {
            return Err(ContractError::config_validation(field, "duplicate phase group name"));
        }
        if group.min_green_s > group.max_green_s {
            return Err(ContractError::config_validation(
                field,
                format!(
                    "min_green_s ({}) must be <= max_green_s ({})",
                    group.min_green_s, group.max_green_s
                ),
            ));
        }
        for lane in &group.lanes {
            if let Some(prev) = owner.insert(*lane, group.name.as_str()) {
                let message = if prev == group.name {
                    format!("lane {lane} listed twice")
                } else {
                    format!("lane {lane} already belongs to group '{prev}'")
                };
                return Err(ContractError::config_validation(field, message));
            }
        }
    }
    Ok(())
}

fn validate_emergency(blueprint: &ControllerBlueprint) -> Result<(), ContractError> {
    if blueprint.emergency.recent_id_window == 0 {
        return Err(ContractError::config_validation(
            "emergency.recent_id_window",
            "recent_id_window must be >= 1",
        ));
    }
    Ok(())
}

fn validate_observers(blueprint: &ControllerBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, observer) in blueprint.observers.iter().enumerate() {
        if !seen.insert(observer.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("observers[{idx}].name"),
                format!("duplicate observer name '{}'", observer.name),
            ));
        }
        if observer.observer_type == ObserverType::Network
            && observer
                .params
                .get("addr")
                .map_or(true, |addr| addr.trim().is_empty())
        {
            return Err(ContractError::config_validation(
                format!("observers[{}].params.addr", observer.name),
                "network observer requires an addr",
            ));
        }
    }
    Ok(())
}
