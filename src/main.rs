use std::collections::HashMap;
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use env_logger::Env;
use jobflow::stubs::InMemoryObjectStore;
use jobflow::{JobRepository, RunState};
use log::warn;
use segment_workflow::catalog::all_tables_text;
use segment_workflow::clients::{ColumnInfo, Services, TableDescription};
use segment_workflow::stubs::{FakeCatalog, FakeEntityResolution, FakeQueryEngine, FakeRecommendationService};
use segment_workflow::{build_engine, LocalLauncher, PipelineConfig, SegmentTool, WorkflowType};
use serde_json::json;

/// Menú interactivo para operar el pipeline de segmentos sobre el
/// repositorio de `job-persistence`. Los servicios externos están
/// simulados en memoria, así que los artefactos viven mientras dure el
/// proceso; registros y runs quedan persistidos.
///
/// Opciones soportadas:
/// 1) Ver el último registro de un pipeline
/// 2) Simular el flujo de integración completo
/// 3) Iniciar un segmento por ítems
/// 4) Consultar el estado del segmento
/// 5) Listar runs de un pipeline
/// 6) Ver tablas del catálogo
/// 7) Salir
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let rt = tokio::runtime::Runtime::new()?;

    // Inicializar repo (aplica migraciones embebidas si procede)
    let repo = Arc::new(job_persistence::new_from_env()?);
    let config = match PipelineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            warn!("{}; se usa la configuración de demostración", e);
            demo_config()?
        }
    };
    let store = Arc::new(InMemoryObjectStore::new());
    let services = simulated_services(store.clone(), &config);

    let segment_engine = Arc::new(build_engine(WorkflowType::Segment, repo.clone(), &services, &config)?);
    let launcher = LocalLauncher::new().with_engine(WorkflowType::Segment, segment_engine)
                                       .wait_for_completion(true);
    let tool = SegmentTool::new(repo.clone(), Arc::new(launcher));

    loop {
        println!("\n== Segment pipeline menu ==");
        println!("1) Ver último registro de un pipeline");
        println!("2) Simular flujo de integración completo");
        println!("3) Iniciar segmento por ítems");
        println!("4) Consultar estado del segmento");
        println!("5) Listar runs de un pipeline");
        println!("6) Ver tablas del catálogo");
        println!("7) Salir");
        print!("Elige una opción: ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        io::stdin().read_line(&mut choice)?;
        match choice.trim() {
            "1" => {
                let pipeline = prompt_pipeline()?;
                match repo.get_record(&pipeline) {
                    Ok(Some(rec)) => {
                        println!("\nPipeline:  {}", rec.pipeline_id);
                        println!("Job:       {}", rec.current_job_id.as_deref().unwrap_or("-"));
                        println!("Tipo:      {}", rec.job_kind.map(|k| k.to_string()).unwrap_or_else(|| "-".into()));
                        println!("Estado:    {}", rec.status.map(|s| s.to_string()).unwrap_or_else(|| "-".into()));
                        println!("Creado:    {}", rec.created_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into()));
                        println!("Terminado: {}", rec.completed_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into()));
                        if let Some(err) = rec.error_message {
                            println!("Error:     {}", err);
                        }
                        println!("Params:    {}", rec.params);
                        println!("Versión:   {}", rec.version);
                    }
                    Ok(None) => println!("Sin registro para {}", pipeline),
                    Err(e) => eprintln!("Error leyendo registro: {}", e),
                }
            }
            "2" => {
                let engine = match build_engine(WorkflowType::DataIntegration, repo.clone(), &services, &config) {
                    Ok(e) => e,
                    Err(e) => { eprintln!("No se puede construir el flujo: {}", e); continue; }
                };
                let run = match engine.start_run(WorkflowType::DataIntegration.pipeline_id(), json!({})) {
                    Ok(r) => r,
                    Err(e) => { eprintln!("Error creando run: {}", e); continue; }
                };
                println!("Run {} iniciado", run.run_id);
                match rt.block_on(engine.run_to_completion(&run.run_id)) {
                    Ok(done) => {
                        println!("Run {} terminó en {}", done.run_id, done.state);
                        if let Some(report) = done.outputs.get("materialize-segment") {
                            println!("Materialización: {}", report);
                        }
                    }
                    Err(e) => eprintln!("Run {} interrumpido: {}", run.run_id, e),
                }
            }
            "3" => {
                let ids_s = prompt("Ids de ítem separados por coma: ")?;
                let ids: Vec<String> = ids_s.split(',')
                                            .map(|s| s.trim().to_string())
                                            .filter(|s| !s.is_empty())
                                            .collect();
                println!("{}", rt.block_on(tool.start_item_segment(&ids)));
            }
            "4" => println!("{}", tool.check_segment_status()),
            "5" => {
                let pipeline = prompt_pipeline()?;
                match repo.list_runs(&pipeline) {
                    Ok(runs) => {
                        println!("\nRUN ID                               | CREADO                    | ESTADO");
                        println!("---------------------------------------------------------------------------------");
                        for r in runs {
                            let state = match &r.state {
                                RunState::Failed { reason, .. } => format!("{} ({})", r.state, reason),
                                other => other.to_string(),
                            };
                            println!("{} | {} | {}", r.run_id, r.created_at.to_rfc3339(), state);
                        }
                    }
                    Err(e) => eprintln!("Error listando runs: {}", e),
                }
            }
            "6" => match rt.block_on(all_tables_text(services.catalog.as_ref(), &config.glue_database)) {
                Ok(text) => println!("\n{}", text),
                Err(e) => eprintln!("Error leyendo el catálogo: {}", e),
            },
            "7" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    Ok(())
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}

fn prompt_pipeline() -> io::Result<String> {
    let p = prompt("Pipeline (segment / data-integration, enter = segment): ")?;
    let p = p.trim();
    Ok(if p.is_empty() { WorkflowType::Segment.pipeline_id().to_string() } else { p.to_string() })
}

fn demo_config() -> Result<PipelineConfig, Box<dyn Error>> {
    let vars: HashMap<String, String> = [("GLUE_DATABASE_NAME", "marketing"),
                                         ("OUTPUT_BUCKET", "query-results"),
                                         ("SEGMENT_BUCKET", "segments"),
                                         ("SEGMENT_PREFIX", "batch/"),
                                         ("TARGET_BUCKET", "datalake"),
                                         ("TARGET_PREFIX", "item_based_segment/"),
                                         ("DATASET_ARN", "arn:demo:dataset/interactions"),
                                         ("DATASET_GROUP_ARN", "arn:demo:dataset-group/retail"),
                                         ("RECIPE_ARN", "arn:demo:recipe/item-affinity"),
                                         ("PERSONALIZE_ROLE_ARN", "arn:demo:role/pipeline"),
                                         ("WORKFLOW_NAME", "customer-matching"),
                                         ("BUCKET_NAME", "customers"),
                                         ("SOURCE_PREFIX", "matching"),
                                         ("DEST_PREFIX", "integrated"),
                                         ("JOB_POLL_INTERVAL_SECS", "1"),
                                         ("JOB_POLL_TIMEOUT_SECS", "60")].into_iter()
                                                                          .map(|(k, v)| (k.to_string(), v.to_string()))
                                                                          .collect();
    Ok(PipelineConfig::from_vars(&vars)?)
}

/// Servicios simulados con datos de ejemplo: salida del matching, maestro
/// de ítems y usuarios asignados por el job de segmentos.
fn simulated_services(store: Arc<InMemoryObjectStore>, config: &PipelineConfig) -> Services {
    if let (Some(bucket), Some(source)) = (&config.bucket_name, &config.source_prefix) {
        let key = format!("{}/er-job-1/success/part-00000.csv", source.trim_end_matches('/'));
        store.insert(bucket, &key, "RecordId,MatchID\nC1,M1\nC2,M1\nC3,M2\n");
    }
    let catalog = FakeCatalog::new().with_table(TableDescription { name: "item_master".into(),
                                                                   description: Some("Maestro de ítems".into()),
                                                                   columns: vec![ColumnInfo { name: "item_id".into(),
                                                                                              data_type: "string".into(),
                                                                                              comment: None }],
                                                                   partition_keys: Vec::new(),
                                                                   parameters: Default::default() });
    let query = FakeQueryEngine::new(store.clone()).with_result("item_master",
                                                                &["item_id"],
                                                                vec![vec!["I1"], vec!["I2"], vec!["I3"]])
                                                   .with_running_polls(0);
    let recommendation = FakeRecommendationService::new().with_segment_output(store.clone(), &["U1", "U2", "U3"]);
    Services { catalog: Arc::new(catalog),
               query: Arc::new(query),
               recommendation: Arc::new(recommendation),
               entity_resolution: Arc::new(FakeEntityResolution::default()),
               store }
}
