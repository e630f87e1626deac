//! Table discovery and schema introspection.
//!
//! Introspection goes through the same query endpoint as ordinary queries:
//! the remote rejects bare PRAGMA statements, but the table-valued pragma
//! functions (`pragma_table_xinfo(...)`) are plain SELECTs and pass through.
//!
//! Results are cached for the lifetime of the connection; datasette databases
//! are immutable in practice, so the cache is populate-once/read-many. A race
//! on first access simply fills twice with identical data.

use std::collections::HashMap;
use std::sync::RwLock;

use sett_ir::{DataType, TableSchema, Value};
use sett_sql::{quote_ident, CompiledQuery};
use tracing::debug;

use crate::client::DatasetteClient;
use crate::errors::CatalogError;

pub struct Catalog {
    client: DatasetteClient,
    tables: RwLock<Option<Vec<String>>>,
    schemas: RwLock<HashMap<String, TableSchema>>,
}

impl Catalog {
    pub fn new(client: DatasetteClient) -> Self {
        Self {
            client,
            tables: RwLock::new(None),
            schemas: RwLock::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &DatasetteClient {
        &self.client
    }

    /// Names of tables and views on the endpoint, sorted, cached.
    pub async fn list_tables(&self) -> Result<Vec<String>, CatalogError> {
        if let Some(cached) = self.tables.read().unwrap_or_else(|e| e.into_inner()).clone() {
            return Ok(cached);
        }

        let query = CompiledQuery {
            sql: "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') \
                  ORDER BY name"
                .to_string(),
            columns: vec!["name".to_string()],
            types: vec![DataType::Text],
        };
        let result = self.client.execute(&query).await.map_err(|err| match err {
            // Datasette 404s the whole {database}.json path when the
            // database name is wrong.
            crate::errors::ExecutionError::RemoteFailure { status: 404, .. } => {
                CatalogError::UnknownDatabase(self.client.endpoint().database().to_string())
            }
            other => CatalogError::Execution(other),
        })?;

        let mut names = Vec::with_capacity(result.rows.len());
        for row in result.rows {
            if let Some(Value::Text(name)) = row.into_iter().next() {
                names.push(name);
            }
        }
        debug!(tables = names.len(), "table listing cached");

        *self.tables.write().unwrap_or_else(|e| e.into_inner()) = Some(names.clone());
        Ok(names)
    }

    /// Column names and canonical types for one table, cached.
    ///
    /// A table missing from the listing fails here with `UnknownTable`, at
    /// leaf-construction time, so a bad name never reaches query execution.
    pub async fn schema_of(&self, table: &str) -> Result<TableSchema, CatalogError> {
        if let Some(cached) = self.schemas.read().unwrap_or_else(|e| e.into_inner()).get(table) {
            return Ok(cached.clone());
        }

        if !self.list_tables().await?.iter().any(|t| t == table) {
            return Err(CatalogError::UnknownTable(table.to_string()));
        }

        let query = CompiledQuery {
            sql: format!(
                "SELECT name, type FROM pragma_table_xinfo({}) \
                 WHERE hidden = 0 ORDER BY cid",
                quote_ident(table)
            ),
            columns: vec!["name".to_string(), "type".to_string()],
            types: vec![DataType::Text, DataType::Text],
        };
        let result = self.client.execute(&query).await?;

        let mut columns = Vec::with_capacity(result.rows.len());
        for row in result.rows {
            let mut cells = row.into_iter();
            if let (Some(Value::Text(name)), Some(declared)) = (cells.next(), cells.next()) {
                let declared = match declared {
                    Value::Text(s) => s,
                    // NULL declaration: no type at all, text affinity.
                    _ => String::new(),
                };
                columns.push((name, DataType::from_declared(&declared)));
            }
        }

        let schema = TableSchema::new(columns);
        debug!(%table, columns = schema.len(), "schema cached");
        self.schemas
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table.to_string(), schema.clone());
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::Endpoint;

    // A panic while holding a cache lock must not take the catalog down
    // with it; the guard is recovered and the cached data served as-is.
    #[tokio::test]
    async fn poisoned_cache_lock_still_serves_cached_tables() {
        let endpoint = Endpoint::new("http://127.0.0.1:1").unwrap();
        let catalog = Arc::new(Catalog::new(DatasetteClient::new(endpoint).unwrap()));
        *catalog.tables.write().unwrap() = Some(vec!["albums".to_string()]);

        let poisoner = Arc::clone(&catalog);
        std::thread::spawn(move || {
            let _guard = poisoner.tables.write().unwrap();
            panic!("poisoning the table cache");
        })
        .join()
        .unwrap_err();
        assert!(catalog.tables.is_poisoned());

        let tables = catalog.list_tables().await.unwrap();
        assert_eq!(tables, vec!["albums".to_string()]);
    }
}
