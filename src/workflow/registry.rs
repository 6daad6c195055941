//! Template id to workflow resolution
//!
//! The mapping is fixed at startup: built-in template ids plus optional
//! overrides from configuration. Invalid overrides fail startup instead of
//! surfacing on the first message.

use super::analogous::AnalogousWorkflow;
use super::custom::CustomWorkflow;
use super::examination::ExaminationWorkflow;
use super::fill_gaps::FillGapsWorkflow;
use super::reflection::ReflectionWorkflow;
use super::roleplay::RoleplayWorkflow;
use super::{Workflow, WorkflowKind};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Built-in template assignments
pub const DEFAULT_TEMPLATES: [(i64, WorkflowKind); 6] = [
    (12, WorkflowKind::Examination),
    (25, WorkflowKind::Custom),
    (26, WorkflowKind::FillGaps),
    (27, WorkflowKind::Roleplay),
    (28, WorkflowKind::Reflection),
    (29, WorkflowKind::Analogous),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("template {0} is mapped more than once")]
    DuplicateTemplate(i64),
    #[error("template {template_id} names unknown workflow '{kind}'")]
    UnknownKind { template_id: i64, kind: String },
    #[error("malformed template mapping '{0}', expected <id>=<workflow>")]
    Malformed(String),
}

fn build(kind: WorkflowKind) -> Arc<dyn Workflow> {
    match kind {
        WorkflowKind::Examination => Arc::new(ExaminationWorkflow),
        WorkflowKind::Custom => Arc::new(CustomWorkflow),
        WorkflowKind::FillGaps => Arc::new(FillGapsWorkflow),
        WorkflowKind::Roleplay => Arc::new(RoleplayWorkflow),
        WorkflowKind::Reflection => Arc::new(ReflectionWorkflow),
        WorkflowKind::Analogous => Arc::new(AnalogousWorkflow),
    }
}

/// Parse `12=examination,40=roleplay` style overrides
pub fn parse_overrides(raw: &str) -> Result<Vec<(i64, WorkflowKind)>, RegistryError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((id, kind)) = entry.split_once('=') else {
            return Err(RegistryError::Malformed(entry.to_string()));
        };
        let template_id: i64 = id
            .trim()
            .parse()
            .map_err(|_| RegistryError::Malformed(entry.to_string()))?;
        let kind = kind
            .parse::<WorkflowKind>()
            .map_err(|_| RegistryError::UnknownKind {
                template_id,
                kind: kind.trim().to_string(),
            })?;
        if !seen.insert(template_id) {
            return Err(RegistryError::DuplicateTemplate(template_id));
        }
        out.push((template_id, kind));
    }
    Ok(out)
}

pub struct WorkflowRegistry {
    templates: BTreeMap<i64, WorkflowKind>,
    workflows: HashMap<WorkflowKind, Arc<dyn Workflow>>,
}

impl WorkflowRegistry {
    /// Built-in templates only
    pub fn new() -> Self {
        Self::with_templates(&DEFAULT_TEMPLATES)
    }

    fn with_templates(templates: &[(i64, WorkflowKind)]) -> Self {
        Self {
            templates: templates.iter().copied().collect(),
            workflows: WorkflowKind::ALL
                .into_iter()
                .map(|kind| (kind, build(kind)))
                .collect(),
        }
    }

    /// Built-in templates with configured overrides applied on top
    pub fn with_overrides(raw: Option<&str>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        let Some(raw) = raw else {
            return Ok(registry);
        };
        for (template_id, kind) in parse_overrides(raw)? {
            if let Some(previous) = registry.templates.insert(template_id, kind) {
                tracing::info!(template_id, from = %previous, to = %kind, "Template remapped");
            }
        }
        Ok(registry)
    }

    pub fn kind_for(&self, template_id: i64) -> Option<WorkflowKind> {
        self.templates.get(&template_id).copied()
    }

    /// The workflow serving a template, if one is mapped
    pub fn resolve(&self, template_id: i64) -> Option<Arc<dyn Workflow>> {
        let kind = self.kind_for(template_id)?;
        self.workflows.get(&kind).cloned()
    }

    /// All template mappings, ordered by id
    pub fn templates(&self) -> impl Iterator<Item = (i64, WorkflowKind)> + '_ {
        self.templates.iter().map(|(id, kind)| (*id, *kind))
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_templates_resolve() {
        let registry = WorkflowRegistry::new();
        for (template_id, kind) in DEFAULT_TEMPLATES {
            let workflow = registry.resolve(template_id).unwrap();
            assert_eq!(workflow.kind(), kind);
        }
        assert!(registry.resolve(99).is_none());
        assert_eq!(registry.templates().count(), 6);
    }

    #[test]
    fn test_overrides_add_and_remap() {
        let registry = WorkflowRegistry::with_overrides(Some("40=roleplay, 12=custom")).unwrap();
        assert_eq!(registry.kind_for(40), Some(WorkflowKind::Roleplay));
        assert_eq!(registry.kind_for(12), Some(WorkflowKind::Custom));
        assert_eq!(registry.kind_for(26), Some(WorkflowKind::FillGaps));
    }

    #[test]
    fn test_invalid_overrides_fail() {
        assert_eq!(
            parse_overrides("40=roleplay,40=custom"),
            Err(RegistryError::DuplicateTemplate(40))
        );
        assert_eq!(
            parse_overrides("41=quiz"),
            Err(RegistryError::UnknownKind {
                template_id: 41,
                kind: "quiz".to_string()
            })
        );
        assert!(matches!(
            parse_overrides("roleplay"),
            Err(RegistryError::Malformed(_))
        ));
        assert!(WorkflowRegistry::with_overrides(Some("x=custom")).is_err());
        assert!(parse_overrides(" , ").unwrap().is_empty());
    }
}
