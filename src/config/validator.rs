//! Config validation: referential integrity between resource declarations.

use crate::config::{RelationshipConfig, RelationshipKindConfig, ResourceConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

pub fn validate(resources: &[ResourceConfig]) -> Result<(), ConfigError> {
    let mut by_name: HashMap<&str, &ResourceConfig> = HashMap::new();
    for r in resources {
        if r.name.is_empty() {
            return Err(ConfigError::Validation("resource type name must not be empty".into()));
        }
        if by_name.insert(r.name.as_str(), r).is_some() {
            return Err(ConfigError::DuplicateResourceType(r.name.clone()));
        }
    }

    for r in resources {
        if let Some(base) = &r.base {
            if !by_name.contains_key(base.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "resource type",
                    id: base.clone(),
                });
            }
        }

        let mut field_names = HashSet::new();
        for a in &r.attributes {
            if a.name.is_empty() || a.name == "id" {
                return Err(ConfigError::Validation(format!(
                    "attribute name '{}' on '{}' is reserved or empty",
                    a.name, r.name
                )));
            }
            if !field_names.insert(a.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    resource: r.name.clone(),
                    field: a.name.clone(),
                });
            }
        }

        for rel in &r.relationships {
            if !field_names.insert(rel.name.as_str()) {
                return Err(ConfigError::DuplicateField {
                    resource: r.name.clone(),
                    field: rel.name.clone(),
                });
            }
            if !by_name.contains_key(rel.target.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "resource type",
                    id: rel.target.clone(),
                });
            }
            if rel.kind == RelationshipKindConfig::HasManyThrough && rel.through.is_none() {
                return Err(ConfigError::MissingReference {
                    kind: "through table",
                    id: format!("{}.{}", r.name, rel.name),
                });
            }
            if let Some(inverse) = &rel.inverse {
                validate_inverse(r, rel, inverse, &by_name)?;
            }
        }
    }
    Ok(())
}

fn validate_inverse(
    owner: &ResourceConfig,
    rel: &RelationshipConfig,
    inverse: &str,
    by_name: &HashMap<&str, &ResourceConfig>,
) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidInverse {
        resource: owner.name.clone(),
        relationship: rel.name.clone(),
        reason,
    };
    let counterpart = relationships_with_inherited(&rel.target, by_name)
        .into_iter()
        .find(|s| s.name == inverse)
        .ok_or_else(|| invalid(format!("'{}' has no relationship named '{}'", rel.target, inverse)))?;
    if !is_same_or_derived(&owner.name, &counterpart.target, by_name) {
        return Err(invalid(format!(
            "'{}.{}' points at '{}', not '{}'",
            rel.target, inverse, counterpart.target, owner.name
        )));
    }
    if let Some(back) = &counterpart.inverse {
        if back != &rel.name {
            return Err(invalid(format!(
                "'{}.{}' declares '{}' as its inverse",
                rel.target, inverse, back
            )));
        }
    }
    Ok(())
}

fn relationships_with_inherited<'a>(
    name: &str,
    by_name: &HashMap<&str, &'a ResourceConfig>,
) -> Vec<&'a RelationshipConfig> {
    let mut out = Vec::new();
    let mut current = by_name.get(name).copied();
    let mut guard = HashSet::new();
    while let Some(r) = current {
        if !guard.insert(r.name.as_str()) {
            break;
        }
        out.extend(r.relationships.iter());
        current = r.base.as_deref().and_then(|b| by_name.get(b).copied());
    }
    out
}

fn is_same_or_derived(candidate: &str, ancestor: &str, by_name: &HashMap<&str, &ResourceConfig>) -> bool {
    let mut current = Some(candidate);
    let mut guard = HashSet::new();
    while let Some(name) = current {
        if name == ancestor {
            return true;
        }
        if !guard.insert(name) {
            return false;
        }
        current = by_name.get(name).and_then(|r| r.base.as_deref());
    }
    false
}
