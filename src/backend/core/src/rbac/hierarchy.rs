//! Resource hierarchy: parent-type rules and an arena-backed forest.
//!
//! Resources form a forest. Each node stores the arena index of its parent
//! instead of a pointer, and a child can only be inserted once its parent is
//! present, so cycles cannot be built.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::models::{Resource, ResourceId};
use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Hierarchy rules
// ═══════════════════════════════════════════════════════════════════════════════

/// Which parents a resource type accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRule {
    /// The type may be a root of the forest.
    pub root_allowed: bool,
    /// Type values accepted as a parent.
    pub parents: Vec<String>,
}

impl ParentRule {
    pub fn root_only() -> Self {
        Self {
            root_allowed: true,
            parents: Vec::new(),
        }
    }

    pub fn under(parents: &[&str]) -> Self {
        Self {
            root_allowed: false,
            parents: parents.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn root_or_under(parents: &[&str]) -> Self {
        Self {
            root_allowed: true,
            ..Self::under(parents)
        }
    }
}

/// Parent-type compatibility for every known resource type.
///
/// Types without a rule accept any parent, or none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyRules {
    rules: HashMap<String, ParentRule>,
}

impl Default for HierarchyRules {
    fn default() -> Self {
        Self::empty()
            .with_rule("company", ParentRule::root_only())
            .with_rule("project", ParentRule::under(&["company"]))
            .with_rule("worker", ParentRule::under(&["company", "project"]))
            .with_rule("user", ParentRule::root_or_under(&["company"]))
    }
}

impl HierarchyRules {
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn with_rule(mut self, type_value: impl Into<String>, rule: ParentRule) -> Self {
        self.rules.insert(type_value.into(), rule);
        self
    }

    pub fn rule(&self, type_value: &str) -> Option<&ParentRule> {
        self.rules.get(type_value)
    }

    /// Check that a `child_type` resource may sit under `parent_type`.
    pub fn check(&self, child_type: &str, parent_type: Option<&str>) -> Result<()> {
        let Some(rule) = self.rules.get(child_type) else {
            return Ok(());
        };

        let allowed = match parent_type {
            None => rule.root_allowed,
            Some(parent) => rule.parents.iter().any(|p| p == parent),
        };

        if allowed {
            Ok(())
        } else {
            Err(WardenError::invalid_hierarchy(child_type, parent_type))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Forest
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct ResourceNode {
    resource: Resource,
    parent: Option<usize>,
}

/// Arena of resources indexed by id and uuid.
#[derive(Debug, Clone, Default)]
pub struct ResourceForest {
    nodes: Vec<ResourceNode>,
    by_id: HashMap<ResourceId, usize>,
    by_uuid: HashMap<String, usize>,
}

impl ResourceForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a forest from rows in any order.
    ///
    /// Fails if a row names a parent that is not among the rows, or if the
    /// rows contain a cycle.
    pub fn from_resources(resources: Vec<Resource>) -> Result<Self> {
        let mut pending = resources;
        let mut forest = Self::new();

        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for resource in pending {
                let ready = resource
                    .parent_id
                    .map_or(true, |parent| forest.by_id.contains_key(&parent));
                if ready {
                    forest.insert(resource)?;
                } else {
                    deferred.push(resource);
                }
            }
            if deferred.len() == before {
                let orphan = &deferred[0];
                return Err(WardenError::internal(format!(
                    "resource {} has a dangling or cyclic parent chain",
                    orphan.uuid
                )));
            }
            pending = deferred;
        }

        Ok(forest)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a resource whose parent, if any, is already present.
    pub fn insert(&mut self, resource: Resource) -> Result<()> {
        if self.by_uuid.contains_key(&resource.uuid) || self.by_id.contains_key(&resource.id) {
            return Err(WardenError::duplicate_resource(&resource.uuid));
        }

        let parent = match resource.parent_id {
            Some(parent_id) => Some(
                *self
                    .by_id
                    .get(&parent_id)
                    .ok_or_else(|| WardenError::parent_not_found(parent_id.to_string()))?,
            ),
            None => None,
        };

        let index = self.nodes.len();
        self.by_id.insert(resource.id, index);
        self.by_uuid.insert(resource.uuid.clone(), index);
        self.nodes.push(ResourceNode { resource, parent });
        Ok(())
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.by_id.get(&id).map(|&i| &self.nodes[i].resource)
    }

    pub fn get_by_uuid(&self, uuid: &str) -> Option<&Resource> {
        self.by_uuid.get(uuid).map(|&i| &self.nodes[i].resource)
    }

    pub fn parent_of(&self, id: ResourceId) -> Option<&Resource> {
        let index = *self.by_id.get(&id)?;
        self.nodes[index]
            .parent
            .map(|parent| &self.nodes[parent].resource)
    }

    /// Ancestors from the immediate parent up to the root.
    pub fn ancestors(&self, id: ResourceId) -> Result<Vec<&Resource>> {
        let mut index = *self
            .by_id
            .get(&id)
            .ok_or_else(|| WardenError::resource_not_found(id))?;
        let mut chain = Vec::new();

        while let Some(parent) = self.nodes[index].parent {
            if chain.len() >= self.nodes.len() {
                return Err(WardenError::internal(format!(
                    "parent chain of resource {} does not terminate",
                    id
                )));
            }
            chain.push(&self.nodes[parent].resource);
            index = parent;
        }

        Ok(chain)
    }

    /// Number of ancestors.
    pub fn depth(&self, id: ResourceId) -> Result<usize> {
        self.ancestors(id).map(|chain| chain.len())
    }

    pub fn children(&self, id: ResourceId) -> Vec<&Resource> {
        let Some(&index) = self.by_id.get(&id) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .filter(|node| node.parent == Some(index))
            .map(|node| &node.resource)
            .collect()
    }

    pub fn roots(&self) -> impl Iterator<Item = &Resource> {
        self.nodes
            .iter()
            .filter(|node| node.parent.is_none())
            .map(|node| &node.resource)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.nodes.iter().map(|node| &node.resource)
    }
}
