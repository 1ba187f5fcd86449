use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tipos de workflow que sabe construir el crate. El nombre en texto es
/// también la identidad de pipeline bajo la que se persisten registro y
/// runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowType {
    DataIntegration,
    Segment,
    Unknown,
}

impl WorkflowType {
    pub fn pipeline_id(&self) -> &'static str {
        match self {
            WorkflowType::DataIntegration => "data-integration",
            WorkflowType::Segment => "segment",
            WorkflowType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pipeline_id())
    }
}

impl FromStr for WorkflowType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "data-integration" | "data_integration" => Ok(WorkflowType::DataIntegration),
            "segment" => Ok(WorkflowType::Segment),
            _ => Ok(WorkflowType::Unknown),
        }
    }
}

impl Default for WorkflowType {
    fn default() -> Self {
        WorkflowType::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names_and_falls_back_to_unknown() {
        assert_eq!("segment".parse::<WorkflowType>(), Ok(WorkflowType::Segment));
        assert_eq!("DATA_INTEGRATION".parse::<WorkflowType>(), Ok(WorkflowType::DataIntegration));
        assert_eq!("otro".parse::<WorkflowType>(), Ok(WorkflowType::Unknown));
        assert_eq!(WorkflowType::DataIntegration.to_string(), "data-integration");
    }
}
