// catalog.rs
//
// Texto legible con las tablas del catálogo y sus esquemas.
use crate::clients::{CatalogService, ColumnInfo, TableDescription, TableInfo};
use crate::errors::Result;
use log::info;

const NO_DESCRIPTION: &str = "Sin descripción";

/// Lista de tablas de `database` en formato tabla.
pub fn format_table_list(database: &str, tables: &[TableInfo]) -> String {
    if tables.is_empty() {
        return format!("No hay tablas en la base '{}'.", database);
    }
    let mut out = vec![format!("Tablas disponibles en la base '{}':", database),
                       "Tabla | Descripción".to_string(),
                       "------|------------".to_string()];
    for t in tables {
        out.push(format!("{} | {}", t.name, t.description.as_deref().unwrap_or(NO_DESCRIPTION)));
    }
    out.join("\n")
}

fn push_columns(out: &mut Vec<String>, columns: &[ColumnInfo]) {
    out.push("Columna | Tipo | Descripción".to_string());
    out.push("--------|------|------------".to_string());
    for c in columns {
        out.push(format!("{} | {} | {}", c.name, c.data_type, c.comment.as_deref().unwrap_or(NO_DESCRIPTION)));
    }
}

/// Esquema de una tabla: columnas, claves de partición y propiedades.
pub fn format_table_description(database: &str, table: &str, description: Option<&TableDescription>) -> String {
    let Some(desc) = description else {
        return format!("La tabla '{}' no existe en la base '{}'.", table, database);
    };
    let mut out = vec![format!("Esquema de la tabla '{}':", table),
                       format!("Descripción: {}", desc.description.as_deref().unwrap_or(NO_DESCRIPTION)),
                       String::new()];
    push_columns(&mut out, &desc.columns);
    if !desc.partition_keys.is_empty() {
        out.push(String::new());
        out.push("Claves de partición:".to_string());
        push_columns(&mut out, &desc.partition_keys);
    }
    if !desc.parameters.is_empty() {
        out.push(String::new());
        out.push("Propiedades:".to_string());
        for (k, v) in &desc.parameters {
            out.push(format!("{}: {}", k, v));
        }
    }
    out.join("\n")
}

pub async fn list_tables_text(catalog: &dyn CatalogService, database: &str) -> Result<(String, Vec<TableInfo>)> {
    let tables = catalog.list_tables(database).await?;
    Ok((format_table_list(database, &tables), tables))
}

pub async fn describe_table_text(catalog: &dyn CatalogService, database: &str, table: &str) -> Result<String> {
    info!("describiendo tabla {}.{}", database, table);
    let desc = catalog.describe_table(database, table).await?;
    Ok(format_table_description(database, table, desc.as_ref()))
}

/// Lista de tablas seguida del esquema de cada una.
pub async fn all_tables_text(catalog: &dyn CatalogService, database: &str) -> Result<String> {
    let (listing, tables) = list_tables_text(catalog, database).await?;
    if tables.is_empty() {
        return Ok(listing);
    }
    let mut out = vec![listing, "\n\nESQUEMAS DETALLADOS:".to_string()];
    for t in &tables {
        out.push(format!("\n{}", describe_table_text(catalog, database, &t.name).await?));
    }
    Ok(out.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn col(name: &str, ty: &str, comment: Option<&str>) -> ColumnInfo {
        ColumnInfo { name: name.into(), data_type: ty.into(), comment: comment.map(str::to_string) }
    }

    #[test]
    fn table_list_uses_default_description() {
        let tables = vec![TableInfo { name: "item_master".into(), description: Some("Maestro de ítems".into()) },
                          TableInfo { name: "purchase_history".into(), description: None }];
        let text = format_table_list("marketing", &tables);
        assert!(text.starts_with("Tablas disponibles en la base 'marketing':"));
        assert!(text.contains("item_master | Maestro de ítems"));
        assert!(text.contains("purchase_history | Sin descripción"));
        assert_eq!(format_table_list("vacia", &[]), "No hay tablas en la base 'vacia'.");
    }

    #[test]
    fn description_includes_partitions_and_properties() {
        let mut parameters = IndexMap::new();
        parameters.insert("classification".to_string(), "csv".to_string());
        let desc = TableDescription { name: "purchase_history".into(),
                                      description: None,
                                      columns: vec![col("customer_id", "string", Some("cliente")), col("item_id", "string", None)],
                                      partition_keys: vec![col("dt", "string", None)],
                                      parameters };
        let text = format_table_description("marketing", "purchase_history", Some(&desc));
        assert!(text.contains("customer_id | string | cliente"));
        assert!(text.contains("item_id | string | Sin descripción"));
        assert!(text.contains("Claves de partición:\nColumna | Tipo | Descripción"));
        assert!(text.ends_with("classification: csv"));

        assert!(format_table_description("marketing", "x", None).contains("no existe"));
    }
}
