//! TP-003: YAML parsing and validation.
//!
//! Parses service templates and planning policies, and validates references
//! that flattening and planning would otherwise tolerate silently:
//! - Node template types must exist
//! - Requirement targets and named relationship templates must exist
//! - Group members and policy targets must name something
//! - `derived_from` must name a type of the same kind

use super::digest::hash_string;
use super::error::{Result, TopologyError};
use super::types::*;
use indexmap::IndexMap;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a service template file from disk.
pub fn parse_template_file(path: &Path) -> Result<ServiceTemplate> {
    let content = read(path)?;
    tracing::debug!(path = %path.display(), digest = %hash_string(&content), "template loaded");
    parse_template(&content)
}

/// Parse a service template from a string.
pub fn parse_template(yaml: &str) -> Result<ServiceTemplate> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

impl PlanPolicy {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }
}

/// Load a planning policy document. An empty file yields the defaults.
pub fn load_policy(path: &Path) -> Result<PlanPolicy> {
    let content = read(path)?;
    if content.trim().is_empty() {
        return Ok(PlanPolicy::default());
    }
    PlanPolicy::from_yaml(&content)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Validate a parsed template. Returns a list of errors (empty = valid).
pub fn validate_template(template: &ServiceTemplate) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let topology = &template.topology_template;

    check_parents(&mut errors, "node", &template.node_types, |t| t.derived_from.as_deref());
    check_parents(&mut errors, "relationship", &template.relationship_types, |t| {
        t.derived_from.as_deref()
    });
    check_parents(&mut errors, "capability", &template.capability_types, |t| {
        t.derived_from.as_deref()
    });
    check_parents(&mut errors, "interface", &template.interface_types, |t| {
        t.derived_from.as_deref()
    });
    check_parents(&mut errors, "group", &template.group_types, |t| t.derived_from.as_deref());
    check_parents(&mut errors, "policy", &template.policy_types, |t| t.derived_from.as_deref());

    for (name, node) in &topology.node_templates {
        if !template.node_types.contains_key(&node.type_name) {
            errors.push(ValidationError {
                message: format!("node template '{}' has unknown type '{}'", name, node.type_name),
            });
        }

        for (req_name, req) in node.requirement_assignments() {
            if let Some(target) = &req.node {
                if target == name {
                    errors.push(ValidationError {
                        message: format!("node template '{}' requires itself ('{}')", name, req_name),
                    });
                } else if !topology.node_templates.contains_key(target)
                    && !template.node_types.contains_key(target)
                {
                    errors.push(ValidationError {
                        message: format!(
                            "node template '{}' requirement '{}' targets unknown node '{}'",
                            name, req_name, target
                        ),
                    });
                }
            }

            let relationship = req.relationship.as_ref().and_then(|r| r.type_name.as_deref());
            if let Some(rel) = relationship {
                if !topology.relationship_templates.contains_key(rel)
                    && !template.relationship_types.contains_key(rel)
                {
                    errors.push(ValidationError {
                        message: format!(
                            "node template '{}' requirement '{}' uses unknown relationship '{}'",
                            name, req_name, rel
                        ),
                    });
                }
            }
        }
    }

    for (name, rel) in &topology.relationship_templates {
        if !template.relationship_types.contains_key(&rel.type_name) {
            errors.push(ValidationError {
                message: format!("relationship template '{}' has unknown type '{}'", name, rel.type_name),
            });
        }
    }

    for (name, group) in &topology.groups {
        for member in &group.members {
            if !topology.node_templates.contains_key(member) {
                errors.push(ValidationError {
                    message: format!("group '{}' has unknown member '{}'", name, member),
                });
            }
        }
    }

    for (name, policy) in topology.policy_definitions() {
        for target in &policy.targets {
            if !topology.node_templates.contains_key(target) && !topology.groups.contains_key(target) {
                errors.push(ValidationError {
                    message: format!("policy '{}' targets unknown node or group '{}'", name, target),
                });
            }
        }
    }

    errors
}

fn check_parents<T>(
    errors: &mut Vec<ValidationError>,
    kind: &str,
    catalog: &IndexMap<String, T>,
    parent: impl Fn(&T) -> Option<&str>,
) {
    for (name, ty) in catalog {
        if let Some(p) = parent(ty) {
            if !catalog.contains_key(p) {
                errors.push(ValidationError {
                    message: format!("{} type '{}' derives from unknown type '{}'", kind, name, p),
                });
            }
        }
    }
}
