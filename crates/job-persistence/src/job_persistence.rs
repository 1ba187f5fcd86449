use crate::schema;
use crate::schema::job_records::dsl as rec_dsl;
use crate::schema::pipeline_runs::dsl as run_dsl;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use jobflow::{JobError, JobRecord, JobRepository, PersistResult, PipelineRun, Result};
use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

#[cfg(feature = "pg")]
type DbConn = PgConnection;
#[cfg(not(feature = "pg"))]
type DbConn = SqliteConnection;
type DbPool = Pool<ConnectionManager<DbConn>>;

/// Aplica los PRAGMA de SQLite a cada conexión nueva del pool.
#[cfg(not(feature = "pg"))]
#[derive(Debug)]
struct SqlitePragmas;

#[cfg(not(feature = "pg"))]
impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        diesel::sql_query("PRAGMA journal_mode = WAL;").execute(conn)
                                                       .map_err(diesel::r2d2::Error::QueryError)?;
        diesel::sql_query("PRAGMA busy_timeout = 5000;").execute(conn)
                                                        .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

/// Repo Diesel que implementa `JobRepository`.
pub struct DieselJobRepository {
    pool: Arc<DbPool>,
}

impl DieselJobRepository {
    /// Crea el pool y ejecuta las migraciones pendientes.
    pub fn new(database_url: &str) -> Result<Self> {
        let manager = ConnectionManager::<DbConn>::new(database_url);
        let builder = Pool::builder().max_size(4);
        #[cfg(not(feature = "pg"))]
        let builder = builder.connection_customizer(Box::new(SqlitePragmas));
        let pool = builder.build(manager)
                          .map_err(|e| JobError::Storage(format!("no se pudo crear el pool de conexiones: {}", e)))?;
        let repo = DieselJobRepository { pool: Arc::new(pool) };
        let mut c = repo.conn()?;
        let applied = c.run_pending_migrations(MIGRATIONS)
                       .map_err(|e| JobError::Storage(format!("migraciones: {}", e)))?;
        if !applied.is_empty() {
            info!("job-persistence: {} migraciones aplicadas", applied.len());
        }
        Ok(repo)
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<DbConn>>> {
        self.pool.get().map_err(|e| JobError::Storage(format!("pool: {}", e)))
    }
}

/// Construye el repositorio desde `JOBFLOW_DB_URL` o `DATABASE_URL`.
///
/// Con SQLite, si ninguna está definida se usa el archivo `jobflow.db`.
#[cfg(feature = "pg")]
pub fn new_from_env() -> Result<DieselJobRepository> {
    dotenvy::dotenv().ok();
    let url = std::env::var("JOBFLOW_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                             .map_err(|_| JobError::Storage("JOBFLOW_DB_URL / DATABASE_URL no definido".into()))?;
    let l = url.to_lowercase();
    if !(l.starts_with("postgres") || url.contains('@')) {
        return Err(JobError::Storage("JOBFLOW_DB_URL no parece una URL de Postgres".into()));
    }
    DieselJobRepository::new(&url)
}

#[cfg(not(feature = "pg"))]
pub fn new_from_env() -> Result<DieselJobRepository> {
    dotenvy::dotenv().ok();
    let url = std::env::var("JOBFLOW_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                             .unwrap_or_else(|_| "jobflow.db".into());
    debug!("job-persistence: usando SQLite en {}", url);
    DieselJobRepository::new(&url)
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = schema::job_records)]
#[diesel(primary_key(pipeline_id))]
#[diesel(treat_none_as_null = true)]
struct JobRecordRow {
    pub pipeline_id: String,
    pub current_job_id: Option<String>,
    pub job_kind: Option<String>,
    pub status: Option<String>,
    pub created_at_ts: Option<i64>,
    pub completed_at_ts: Option<i64>,
    pub params: String,
    pub error_message: Option<String>,
    pub version: i64,
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = schema::pipeline_runs)]
struct PipelineRunRow {
    pub run_id: String,
    pub pipeline_id: String,
    pub state: String,
    pub body: String,
    pub created_at_ts: i64,
    pub updated_at_ts: i64,
    pub version: i64,
}

fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T> {
    res.map_err(|e| JobError::Storage(format!("db: {}", e)))
}

fn is_unique_violation(e: &DieselError) -> bool {
    matches!(e, DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
}

fn ts(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::<Utc>::from_timestamp_millis)
}

impl JobRecordRow {
    fn from_record(r: &JobRecord, version: i64) -> Result<Self> {
        Ok(JobRecordRow { pipeline_id: r.pipeline_id.clone(),
                          current_job_id: r.current_job_id.clone(),
                          job_kind: r.job_kind.map(|k| k.to_string()),
                          status: r.status.map(|s| s.to_string()),
                          created_at_ts: r.created_at.map(|t| t.timestamp_millis()),
                          completed_at_ts: r.completed_at.map(|t| t.timestamp_millis()),
                          params: serde_json::to_string(&r.params)?,
                          error_message: r.error_message.clone(),
                          version })
    }

    fn into_record(self) -> Result<JobRecord> {
        Ok(JobRecord { pipeline_id: self.pipeline_id,
                       current_job_id: self.current_job_id,
                       job_kind: self.job_kind.map(|k| k.parse()).transpose()?,
                       status: self.status.map(|s| s.parse()).transpose()?,
                       created_at: ts(self.created_at_ts),
                       completed_at: ts(self.completed_at_ts),
                       params: serde_json::from_str(&self.params)?,
                       error_message: self.error_message,
                       version: self.version })
    }
}

impl PipelineRunRow {
    fn from_run(run: &PipelineRun, version: i64) -> Result<Self> {
        Ok(PipelineRunRow { run_id: run.run_id.to_string(),
                            pipeline_id: run.pipeline_id.clone(),
                            state: run.state.to_string(),
                            body: serde_json::to_string(run)?,
                            created_at_ts: run.created_at.timestamp_millis(),
                            updated_at_ts: run.updated_at.timestamp_millis(),
                            version })
    }

    fn into_run(self) -> Result<PipelineRun> {
        let mut run: PipelineRun = serde_json::from_str(&self.body)?;
        run.version = self.version;
        Ok(run)
    }
}

impl JobRepository for DieselJobRepository {
    fn get_record(&self, pipeline_id: &str) -> Result<Option<JobRecord>> {
        let mut conn = self.conn()?;
        let row = map_db_err(rec_dsl::job_records.filter(rec_dsl::pipeline_id.eq(pipeline_id))
                                                 .first::<JobRecordRow>(&mut conn)
                                                 .optional())?;
        row.map(JobRecordRow::into_record).transpose()
    }

    fn put_record(&self, record: &JobRecord) -> Result<JobRecord> {
        let mut conn = self.conn()?;
        let current: Option<i64> = map_db_err(rec_dsl::job_records.filter(rec_dsl::pipeline_id.eq(&record.pipeline_id))
                                                                  .select(rec_dsl::version)
                                                                  .first::<i64>(&mut conn)
                                                                  .optional())?;
        let new_version = current.unwrap_or(0) + 1;
        let row = JobRecordRow::from_record(record, new_version)?;
        match current {
            Some(_) => {
                map_db_err(diesel::update(rec_dsl::job_records.filter(rec_dsl::pipeline_id.eq(&record.pipeline_id))).set(&row)
                                                                                                                   .execute(&mut conn))?;
            }
            None => match diesel::insert_into(rec_dsl::job_records).values(&row).execute(&mut conn) {
                Ok(_) => {}
                // otro escritor creó la fila entre la lectura y el insert: gana el último
                Err(e) if is_unique_violation(&e) => {
                    map_db_err(diesel::update(rec_dsl::job_records.filter(rec_dsl::pipeline_id.eq(&record.pipeline_id))).set(&row)
                                                                                                                       .execute(&mut conn))?;
                }
                Err(e) => return Err(JobError::Storage(format!("db: {}", e))),
            },
        }
        let mut saved = record.clone();
        saved.version = new_version;
        Ok(saved)
    }

    fn compare_and_put(&self, record: &JobRecord, expected_version: Option<i64>) -> Result<PersistResult> {
        let mut conn = self.conn()?;
        match expected_version {
            None => {
                let row = JobRecordRow::from_record(record, 1)?;
                match diesel::insert_into(rec_dsl::job_records).values(&row).execute(&mut conn) {
                    Ok(_) => Ok(PersistResult::Ok { new_version: 1 }),
                    Err(e) if is_unique_violation(&e) => Ok(PersistResult::Conflict),
                    Err(e) => Err(JobError::Storage(format!("db: {}", e))),
                }
            }
            Some(expected) => {
                let new_version = expected + 1;
                let row = JobRecordRow::from_record(record, new_version)?;
                let updated = map_db_err(diesel::update(rec_dsl::job_records.filter(rec_dsl::pipeline_id.eq(&record.pipeline_id))
                                                                            .filter(rec_dsl::version.eq(expected)))
                                         .set(&row)
                                         .execute(&mut conn))?;
                if updated == 0 {
                    debug!("compare_and_put {}: version {} obsoleta", record.pipeline_id, expected);
                    return Ok(PersistResult::Conflict);
                }
                Ok(PersistResult::Ok { new_version })
            }
        }
    }

    fn create_run(&self, run: &PipelineRun) -> Result<()> {
        let mut conn = self.conn()?;
        let row = PipelineRunRow::from_run(run, run.version)?;
        match diesel::insert_into(run_dsl::pipeline_runs).values(&row).execute(&mut conn) {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(JobError::Conflict(format!("run {} ya existe", run.run_id))),
            Err(e) => Err(JobError::Storage(format!("db: {}", e))),
        }
    }

    fn get_run(&self, run_id: &Uuid) -> Result<PipelineRun> {
        let mut conn = self.conn()?;
        let row = map_db_err(run_dsl::pipeline_runs.filter(run_dsl::run_id.eq(run_id.to_string()))
                                                   .first::<PipelineRunRow>(&mut conn)
                                                   .optional())?;
        row.ok_or_else(|| JobError::NotFound(format!("run {}", run_id)))?
           .into_run()
    }

    fn save_run(&self, run: &PipelineRun, expected_version: i64) -> Result<PersistResult> {
        let mut conn = self.conn()?;
        let new_version = expected_version + 1;
        let row = PipelineRunRow::from_run(run, new_version)?;
        let id_s = run.run_id.to_string();
        let updated = map_db_err(diesel::update(run_dsl::pipeline_runs.filter(run_dsl::run_id.eq(&id_s))
                                                                      .filter(run_dsl::version.eq(expected_version)))
                                 .set((run_dsl::state.eq(&row.state),
                                       run_dsl::body.eq(&row.body),
                                       run_dsl::updated_at_ts.eq(row.updated_at_ts),
                                       run_dsl::version.eq(new_version)))
                                 .execute(&mut conn))?;
        if updated == 1 {
            return Ok(PersistResult::Ok { new_version });
        }
        let exists: i64 = map_db_err(run_dsl::pipeline_runs.filter(run_dsl::run_id.eq(&id_s))
                                                           .count()
                                                           .get_result(&mut conn))?;
        if exists == 0 {
            return Err(JobError::NotFound(format!("run {}", run.run_id)));
        }
        Ok(PersistResult::Conflict)
    }

    fn list_runs(&self, pipeline_id: &str) -> Result<Vec<PipelineRun>> {
        let mut conn = self.conn()?;
        let rows = map_db_err(run_dsl::pipeline_runs.filter(run_dsl::pipeline_id.eq(pipeline_id))
                                                    .order(run_dsl::created_at_ts.desc())
                                                    .load::<PipelineRunRow>(&mut conn))?;
        rows.into_iter().map(PipelineRunRow::into_run).collect()
    }
}
