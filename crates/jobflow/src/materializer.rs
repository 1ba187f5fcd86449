// Archivo: materializer.rs
// Propósito: convertir la salida cruda de un job terminado (líneas JSON) en
// un artefacto CSV durable con reemplazo completo del artefacto anterior.
use crate::errors::{JobError, Result};
use crate::repository::{delete_prefix, ObjectStore};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Columnas fijas del artefacto: clave y valor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSchema {
    pub key_column: String,
    pub value_column: String,
}

impl ArtifactSchema {
    pub fn new(key_column: impl Into<String>, value_column: impl Into<String>) -> Self {
        Self { key_column: key_column.into(), value_column: value_column.into() }
    }

    /// Esquema de resultados de segmento: `item_id,user_id`.
    pub fn segment() -> Self {
        Self::new("item_id", "user_id")
    }
}

/// Ubicación del artefacto: `bucket/prefix<file_name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub bucket: String,
    pub prefix: String,
    pub file_name: String,
}

impl ArtifactLocation {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self { bucket: bucket.into(), prefix: prefix.into(), file_name: file_name.into() }
    }

    /// `<stem>_<YYYYmmddHHMMSS>.csv` bajo `prefix`.
    pub fn timestamped(bucket: impl Into<String>, prefix: impl Into<String>, stem: &str, at: DateTime<Utc>) -> Self {
        Self::new(bucket, prefix, format!("{}_{}.csv", stem, at.format("%Y%m%d%H%M%S")))
    }

    pub fn key(&self) -> String {
        format!("{}{}", self.prefix, self.file_name)
    }
}

/// Registro fuente ya interpretado: una clave y sus valores asociados.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub key: String,
    pub values: Vec<String>,
}

/// Interpreta un registro crudo. `Err` marca el registro como malformado;
/// `Ok(None)` es un registro válido que no aporta filas.
pub trait RecordMapper: Send + Sync {
    fn map(&self, raw: &JsonValue) -> std::result::Result<Option<SourceRecord>, String>;
}

/// Salida de un job de segmentos:
/// `{"input": {"itemId": ..}, "output": {"usersList": [..]}}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentRecordMapper;

impl RecordMapper for SegmentRecordMapper {
    fn map(&self, raw: &JsonValue) -> std::result::Result<Option<SourceRecord>, String> {
        if !raw.is_object() {
            return Err("el registro no es un objeto JSON".to_string());
        }
        let item_id = match raw.pointer("/input/itemId") {
            None | Some(JsonValue::Null) => return Ok(None),
            Some(JsonValue::String(s)) if s.is_empty() => return Ok(None),
            Some(JsonValue::String(s)) => s.clone(),
            Some(other) => return Err(format!("itemId no es texto: {}", other)),
        };
        let users = match raw.pointer("/output/usersList") {
            None | Some(JsonValue::Null) => return Ok(None),
            Some(JsonValue::Array(users)) => users,
            Some(other) => return Err(format!("usersList no es una lista: {}", other)),
        };
        let mut values = Vec::with_capacity(users.len());
        for u in users {
            match u.as_str() {
                Some(s) => values.push(s.to_string()),
                None => return Err(format!("usuario no textual en {}: {}", item_id, u)),
            }
        }
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(SourceRecord { key: item_id, values }))
    }
}

/// Resumen de una materialización.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeReport {
    /// Filas escritas (sin contar la cabecera).
    pub rows: usize,
    /// Registros malformados descartados.
    pub skipped: usize,
    /// Objetos `.csv` anteriores borrados.
    pub deleted: usize,
    pub bucket: String,
    pub key: String,
}

/// Escribe artefactos tabulares sobre un `ObjectStore`.
pub struct Materializer<S>
    where S: ObjectStore + ?Sized
{
    store: Arc<S>,
}

impl<S> Materializer<S> where S: ObjectStore + ?Sized
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Materializa `source` (líneas JSON) en `target` con reemplazo completo.
    ///
    /// El CSV se arma en memoria; luego se borran todos los `.csv` bajo el
    /// prefijo destino y se escribe el nuevo objeto con un único `put`. Una
    /// fuente vacía produce un artefacto sólo con cabecera.
    pub async fn materialize<I, M>(&self,
                                   source: I,
                                   mapper: &M,
                                   target: &ArtifactLocation,
                                   schema: &ArtifactSchema)
                                   -> Result<MaterializeReport>
        where I: IntoIterator,
              I::Item: AsRef<str>,
              M: RecordMapper + ?Sized
    {
        let (body, rows, skipped) = render_csv(source, mapper, schema)?;
        let key = target.key();

        let deleted = delete_prefix(self.store.as_ref(), &target.bucket, &target.prefix, |k| k.ends_with(".csv"))
            .await
            .map_err(|e| JobError::Materialization(format!("no se pudo borrar el artefacto anterior: {}", e)))?;

        self.store
            .put(&target.bucket, &key, body, "text/csv")
              .await
              .map_err(|e| JobError::Materialization(format!("no se pudo escribir s3://{}/{}: {}", target.bucket, key, e)))?;

        info!("artefacto s3://{}/{} escrito: {} filas, {} descartados, {} borrados",
              target.bucket, key, rows, skipped, deleted);
        Ok(MaterializeReport { rows, skipped, deleted, bucket: target.bucket.clone(), key })
    }
}

fn render_csv<I, M>(source: I, mapper: &M, schema: &ArtifactSchema) -> Result<(Vec<u8>, usize, usize)>
    where I: IntoIterator,
          I::Item: AsRef<str>,
          M: RecordMapper + ?Sized
{
    let csv_err = |e: csv::Error| JobError::Materialization(format!("error escribiendo CSV: {}", e));
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([&schema.key_column, &schema.value_column]).map_err(csv_err)?;

    let mut rows = 0;
    let mut skipped = 0;
    for (n, line) in source.into_iter().enumerate() {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        let mapped = serde_json::from_str::<JsonValue>(line).map_err(|e| e.to_string())
                                                             .and_then(|raw| mapper.map(&raw));
        match mapped {
            Ok(Some(record)) => {
                for value in &record.values {
                    writer.write_record([record.key.as_str(), value.as_str()]).map_err(csv_err)?;
                    rows += 1;
                }
            }
            Ok(None) => {}
            Err(reason) => {
                warn!("registro {} descartado: {}", n + 1, reason);
                skipped += 1;
            }
        }
    }

    let body = writer.into_inner()
                     .map_err(|e| JobError::Materialization(format!("error cerrando CSV: {}", e)))?;
    Ok((body, rows, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn segment_mapper_reads_item_and_users() {
        let raw = json!({"input": {"itemId": "I1"}, "output": {"usersList": ["U1", "U2"]}});
        let rec = SegmentRecordMapper.map(&raw).unwrap().unwrap();
        assert_eq!(rec.key, "I1");
        assert_eq!(rec.values, vec!["U1".to_string(), "U2".to_string()]);
    }

    #[test]
    fn segment_mapper_ignores_records_without_users() {
        let raw = json!({"input": {"itemId": "I1"}, "output": {"usersList": []}});
        assert!(SegmentRecordMapper.map(&raw).unwrap().is_none());
        let raw = json!({"output": {"usersList": ["U1"]}});
        assert!(SegmentRecordMapper.map(&raw).unwrap().is_none());
    }

    #[test]
    fn segment_mapper_rejects_wrong_types() {
        assert!(SegmentRecordMapper.map(&json!([1, 2])).is_err());
        assert!(SegmentRecordMapper.map(&json!({"input": {"itemId": 7}, "output": {"usersList": ["U1"]}})).is_err());
    }

    #[test]
    fn csv_counts_rows_and_skips_malformed() {
        let lines = vec![r#"{"input":{"itemId":"I1"},"output":{"usersList":["U1","U2"]}}"#,
                         "{no es json",
                         "",
                         r#"{"input":{"itemId":"I2"},"output":{"usersList":["U3"]}}"#];
        let (body, rows, skipped) = render_csv(lines, &SegmentRecordMapper, &ArtifactSchema::segment()).unwrap();
        assert_eq!(rows, 3);
        assert_eq!(skipped, 1);
        assert_eq!(String::from_utf8(body).unwrap(), "item_id,user_id\nI1,U1\nI1,U2\nI2,U3\n");
    }

    #[test]
    fn timestamped_location_uses_compact_timestamp() {
        let at = DateTime::parse_from_rfc3339("2024-03-05T07:08:09Z").unwrap().with_timezone(&Utc);
        let loc = ArtifactLocation::timestamped("b", "results/", "segment_results", at);
        assert_eq!(loc.key(), "results/segment_results_20240305070809.csv");
    }
}
