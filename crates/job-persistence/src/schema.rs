// Esquema Diesel de las tablas del orquestador.
// Tablas: job_records, pipeline_runs
diesel::table! {
    job_records (pipeline_id) {
        pipeline_id -> Text,
        current_job_id -> Nullable<Text>,
        job_kind -> Nullable<Text>,
        status -> Nullable<Text>,
        created_at_ts -> Nullable<BigInt>,
        completed_at_ts -> Nullable<BigInt>,
        params -> Text,
        error_message -> Nullable<Text>,
        version -> BigInt,
    }
}
diesel::table! {
    pipeline_runs (run_id) {
        run_id -> Text,
        pipeline_id -> Text,
        state -> Text,
        body -> Text,
        created_at_ts -> BigInt,
        updated_at_ts -> BigInt,
        version -> BigInt,
    }
}
