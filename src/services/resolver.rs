use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::errors::BookingError;
use crate::models::{ConversationState, DefaultValue, FunctionSpec, ParamSpec, ResolvedCall, TurnMessage};
use crate::services::ai::extraction::extract_fields;
use crate::services::ai::LlmProvider;
use crate::services::backend::BookingOperations;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Required parameters nobody supplied; the caller must be asked.
    #[error("missing required parameters: {}", .0.join(", "))]
    MissingRequired(Vec<String>),

    /// A declared default could not be computed by the backend.
    #[error(transparent)]
    Backend(#[from] BookingError),
}

/// Fills a planned call's arguments. Precedence: what the decision step
/// passed, then typed state bindings, then one extraction call for required
/// non-identifier parameters still missing, then declared defaults for
/// optional ones.
pub struct ParameterResolver<'a> {
    llm: &'a dyn LlmProvider,
    backend: &'a dyn BookingOperations,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(llm: &'a dyn LlmProvider, backend: &'a dyn BookingOperations) -> Self {
        Self { llm, backend }
    }

    pub async fn resolve(
        &self,
        organization_id: &str,
        spec: &FunctionSpec,
        requested: &Map<String, Value>,
        state: &ConversationState,
        recent: &[TurnMessage],
        today: NaiveDate,
    ) -> Result<ResolvedCall, ResolveError> {
        let params: Vec<&ParamSpec> = spec.required.iter().chain(spec.optional.iter()).collect();
        let mut arguments = Map::new();

        for param in &params {
            if let Some(value) = requested.get(&param.name).and_then(|v| param.normalize(v)) {
                arguments.insert(param.name.clone(), value);
            }
        }
        for name in requested.keys().filter(|k| spec.param(k).is_none()) {
            tracing::debug!(function = %spec.name, param = %name, "dropping undeclared argument");
        }

        for param in &params {
            if arguments.contains_key(&param.name) {
                continue;
            }
            let bound = param
                .binds
                .and_then(|b| b.lookup(state))
                .and_then(|v| param.normalize(&v));
            if let Some(value) = bound {
                arguments.insert(param.name.clone(), value);
            }
        }

        let missing: Vec<&ParamSpec> = spec
            .required
            .iter()
            .filter(|p| p.extractable() && !arguments.contains_key(&p.name))
            .collect();
        if !missing.is_empty() {
            match extract_fields(self.llm, &missing, recent, today).await {
                Ok(found) => {
                    for (name, value) in found {
                        arguments.entry(name).or_insert(value);
                    }
                }
                Err(e) => {
                    tracing::warn!(function = %spec.name, error = %e, "extraction failed, asking the caller instead");
                }
            }
        }

        let still_missing: Vec<String> = spec
            .required
            .iter()
            .filter(|p| !arguments.contains_key(&p.name))
            .map(|p| p.name.clone())
            .collect();
        if !still_missing.is_empty() {
            return Err(ResolveError::MissingRequired(still_missing));
        }

        for param in &spec.optional {
            if arguments.contains_key(&param.name) {
                continue;
            }
            let value = match &param.default {
                None => continue,
                Some(DefaultValue::Literal(v)) => v.clone(),
                Some(DefaultValue::OrganizationDefaultOperatory) => {
                    Value::String(self.backend.default_operatory(organization_id).await?.id)
                }
            };
            arguments.insert(param.name.clone(), value);
        }

        Ok(ResolvedCall {
            function: spec.name.clone(),
            operation: spec.operation,
            arguments,
        })
    }
}
