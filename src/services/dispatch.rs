use std::collections::HashSet;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use crate::models::FunctionSpec;

/// The catalog shipped with the binary; `FUNCTIONS_PATH` replaces it.
pub const DEFAULT_FUNCTIONS: &str = include_str!("../../config/functions.json");

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown function: {0}")]
    NotFound(String),

    #[error("invalid dispatch table: {0}")]
    Invalid(String),
}

#[derive(Deserialize)]
struct TableFile {
    functions: Vec<FunctionSpec>,
}

/// The curated set of functions the decision step may call, in the order
/// they are presented to the model.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    specs: Vec<FunctionSpec>,
}

impl DispatchTable {
    pub fn from_json(json: &str) -> Result<Self, DispatchError> {
        let file: TableFile =
            serde_json::from_str(json).map_err(|e| DispatchError::Invalid(e.to_string()))?;
        Self::new(file.functions)
    }

    pub fn new(specs: Vec<FunctionSpec>) -> Result<Self, DispatchError> {
        let mut names = HashSet::new();
        for spec in &specs {
            if !names.insert(spec.name.as_str()) {
                return Err(DispatchError::Invalid(format!(
                    "function {} is declared twice",
                    spec.name
                )));
            }

            let mut params = HashSet::new();
            for param in spec.required.iter().chain(spec.optional.iter()) {
                if !params.insert(param.name.as_str()) {
                    return Err(DispatchError::Invalid(format!(
                        "{} declares parameter {} twice",
                        spec.name, param.name
                    )));
                }
                if let (Some(min), Some(max)) = (param.min, param.max) {
                    if min > max {
                        return Err(DispatchError::Invalid(format!(
                            "{}: parameter {} has min {min} above max {max}",
                            spec.name, param.name
                        )));
                    }
                }
            }

            if let Some(param) = spec.required.iter().find(|p| p.default.is_some()) {
                return Err(DispatchError::Invalid(format!(
                    "{}: required parameter {} cannot have a default",
                    spec.name, param.name
                )));
            }
        }
        Ok(Self { specs })
    }

    /// Loads the table from `path`, or the built-in catalog when none is set.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let table = match path {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read dispatch table {path}"))?;
                Self::from_json(&json)?
            }
            None => Self::from_json(DEFAULT_FUNCTIONS)?,
        };
        tracing::info!(functions = table.specs.len(), source = path.unwrap_or("built-in"), "loaded dispatch table");
        Ok(table)
    }

    /// Exact name first, then a lenient match (`create_appointment` finds
    /// `CreateAppointment`) since models are inconsistent about casing.
    pub fn resolve_spec(&self, name: &str) -> Result<&FunctionSpec, DispatchError> {
        if let Some(spec) = self.specs.iter().find(|s| s.name == name) {
            return Ok(spec);
        }
        let wanted = loose_name(name);
        self.specs
            .iter()
            .find(|s| loose_name(&s.name) == wanted)
            .ok_or_else(|| DispatchError::NotFound(name.to_string()))
    }

    pub fn list_available(&self) -> &[FunctionSpec] {
        &self.specs
    }

    /// The model-facing capability list, in table order.
    pub fn capability_list(&self) -> Vec<Value> {
        self.specs.iter().map(|s| s.capability()).collect()
    }
}

fn loose_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
