// config.rs
//
// Configuración del pipeline leída de variables de entorno (con `.env`
// opcional vía dotenvy). `from_vars` recibe el mapa ya leído para poder
// probarla sin tocar el entorno del proceso.
use crate::errors::{Result, WorkflowError};
use jobflow::{PollConfig, PollInterval, SubmissionGuard};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Base de datos del catálogo donde viven las tablas.
    pub glue_database: String,
    /// Bucket de resultados de consultas.
    pub output_bucket: String,
    pub segment_bucket: String,
    pub segment_prefix: String,
    pub target_bucket: String,
    pub target_prefix: String,
    pub dataset_arn: Option<String>,
    pub dataset_group_arn: String,
    pub recipe_arn: Option<String>,
    pub role_arn: String,
    /// Workflow de resolución de entidades.
    pub workflow_name: Option<String>,
    /// Bucket y prefijos del paso de actualización del cliente integrado.
    pub bucket_name: Option<String>,
    pub source_prefix: Option<String>,
    pub dest_prefix: Option<String>,
    pub users_per_segment: u32,
    pub solutions_to_keep: usize,
    pub poll: PollConfig,
    pub conditional_submit: bool,
}

impl PipelineConfig {
    /// Lee la configuración del entorno del proceso.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| WorkflowError::Config(format!("{} no definida", key)))
        };
        let optional = |key: &str| vars.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let interval = parse_or(vars, "JOB_POLL_INTERVAL_SECS", 30u64)?;
        let timeout = parse_or(vars, "JOB_POLL_TIMEOUT_SECS", 3600u64)?;
        let retries = parse_or(vars, "JOB_POLL_MAX_RETRIES", 3u32)?;

        Ok(PipelineConfig { glue_database: required("GLUE_DATABASE_NAME")?,
                            output_bucket: required("OUTPUT_BUCKET")?,
                            segment_bucket: required("SEGMENT_BUCKET")?,
                            segment_prefix: required("SEGMENT_PREFIX")?,
                            target_bucket: required("TARGET_BUCKET")?,
                            target_prefix: required("TARGET_PREFIX")?,
                            dataset_arn: optional("DATASET_ARN"),
                            dataset_group_arn: required("DATASET_GROUP_ARN")?,
                            recipe_arn: optional("RECIPE_ARN"),
                            role_arn: required("PERSONALIZE_ROLE_ARN")?,
                            workflow_name: optional("WORKFLOW_NAME"),
                            bucket_name: optional("BUCKET_NAME"),
                            source_prefix: optional("SOURCE_PREFIX"),
                            dest_prefix: optional("DEST_PREFIX"),
                            users_per_segment: parse_or(vars, "USER_PER_SEGMENT", 100u32)?,
                            solutions_to_keep: parse_or(vars, "SOLUTIONS_TO_KEEP", 2usize)?,
                            poll: PollConfig { timeout: Duration::from_secs(timeout),
                                               interval: PollInterval::Fixed(Duration::from_secs(interval)),
                                               max_fetch_retries: retries },
                            conditional_submit: parse_or(vars, "JOBFLOW_CONDITIONAL_SUBMIT", false)? })
    }

    pub fn poll_config(&self) -> PollConfig {
        self.poll
    }

    pub fn submission_guard(&self) -> SubmissionGuard {
        SubmissionGuard::from_flag(self.conditional_submit)
    }

    /// Valor de un campo opcional que un flujo concreto necesita.
    pub fn require<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str> {
        value.as_deref().ok_or_else(|| WorkflowError::Config(format!("{} es obligatoria para este flujo", key)))
    }
}

fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T>
    where T: std::str::FromStr
{
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse::<T>().map_err(|_| WorkflowError::Config(format!("{}: valor inválido '{}'", key, raw))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        [("GLUE_DATABASE_NAME", "marketing"),
         ("OUTPUT_BUCKET", "out"),
         ("SEGMENT_BUCKET", "seg"),
         ("SEGMENT_PREFIX", "segments/"),
         ("TARGET_BUCKET", "data"),
         ("TARGET_PREFIX", "item_based_segment/"),
         ("DATASET_GROUP_ARN", "arn:dsg"),
         ("PERSONALIZE_ROLE_ARN", "arn:role")].into_iter()
                                              .map(|(k, v)| (k.to_string(), v.to_string()))
                                              .collect()
    }

    #[test]
    fn defaults_apply_when_optional_keys_are_missing() {
        let cfg = PipelineConfig::from_vars(&base_vars()).unwrap();
        assert_eq!(cfg.users_per_segment, 100);
        assert_eq!(cfg.solutions_to_keep, 2);
        assert_eq!(cfg.poll.timeout, Duration::from_secs(3600));
        assert_eq!(cfg.poll.interval, PollInterval::Fixed(Duration::from_secs(30)));
        assert_eq!(cfg.poll.max_fetch_retries, 3);
        assert_eq!(cfg.submission_guard(), SubmissionGuard::Advisory);
        assert!(cfg.workflow_name.is_none());
    }

    #[test]
    fn missing_required_key_is_a_config_error() {
        let mut vars = base_vars();
        vars.remove("TARGET_BUCKET");
        let err = PipelineConfig::from_vars(&vars).unwrap_err();
        assert!(matches!(err, WorkflowError::Config(ref m) if m.contains("TARGET_BUCKET")));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = base_vars();
        vars.insert("USER_PER_SEGMENT".into(), "25".into());
        vars.insert("JOBFLOW_CONDITIONAL_SUBMIT".into(), "true".into());
        vars.insert("JOB_POLL_INTERVAL_SECS".into(), "5".into());
        let cfg = PipelineConfig::from_vars(&vars).unwrap();
        assert_eq!(cfg.users_per_segment, 25);
        assert_eq!(cfg.submission_guard(), SubmissionGuard::Conditional);
        assert_eq!(cfg.poll.interval, PollInterval::Fixed(Duration::from_secs(5)));

        vars.insert("USER_PER_SEGMENT".into(), "muchos".into());
        assert!(matches!(PipelineConfig::from_vars(&vars), Err(WorkflowError::Config(_))));
    }
}
