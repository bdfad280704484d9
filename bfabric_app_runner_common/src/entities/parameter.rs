use crate::prelude::*;

entity_view!(
    /// A key/value parameter attached to a workunit.
    Parameter,
    "parameter"
);

/// Who set a parameter.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ParameterContext {
    /// Set by the application definition.
    Application,
    /// Set by the submitter.
    Submitter,
    /// Set by the user submitting the workunit.
    Workunit,
}

impl Parameter {
    /// The parameter name.
    pub fn key(&self) -> Option<&str> {
        self.entity.str_field("key")
    }

    /// The parameter value. Numbers are converted to strings.
    pub fn value(&self) -> Option<String> {
        match self.entity.get("value")? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// The context of this parameter, if it is one we know.
    pub fn context(&self) -> Option<ParameterContext> {
        match self.entity.str_field("context")?.to_ascii_uppercase().as_str() {
            "APPLICATION" => Some(ParameterContext::Application),
            "SUBMITTER" => Some(ParameterContext::Submitter),
            "WORKUNIT" => Some(ParameterContext::Workunit),
            _ => None,
        }
    }
}
