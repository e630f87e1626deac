//! Remote datasette backend: compile relational plans to SQL, execute them
//! over HTTP, get typed tables back.
//!
//! [`Connection`] is the entry point: it binds an [`Endpoint`] to a catalog,
//! hands out leaf-table plans with discovered schemas, and runs plans end to
//! end through the compiler and the paginated JSON protocol.
//!
//! ```no_run
//! # async fn demo() -> Result<(), sett_client::SettError> {
//! use sett_client::{Connection, Endpoint};
//! use sett_ir::{AggCall, Expr, SortKey};
//!
//! let conn = Connection::new(Endpoint::new("https://example.com")?.with_database("fixtures"))?;
//! let mut plan = conn.table("facetable").await?;
//! let t = plan.root().expect("leaf just added");
//! let g = plan.aggregate(
//!     t,
//!     vec!["state".to_string()],
//!     vec![("n".to_string(), AggCall::count_star())],
//! );
//! let s = plan.sort(g, vec![SortKey::desc(Expr::col("n"))]);
//! let table = conn.execute(&plan, s).await?;
//! # let _ = table;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use sett_ir::{NodeId, Plan};
use sett_sql::compile;

mod catalog;
mod client;
mod decode;
mod errors;

pub use catalog::Catalog;
pub use client::{DatasetteClient, Endpoint, MaterializedTable, ResultPage};
pub use decode::decode_value;
pub use errors::{CatalogError, ExecutionError, SettError};

/// A connection to one datasette endpoint.
///
/// Cloning is cheap and clones share the schema cache. Independent `execute`
/// calls may run concurrently; each carries its own pagination cursor and
/// request lifecycle.
#[derive(Clone)]
pub struct Connection {
    catalog: Arc<Catalog>,
}

impl Connection {
    pub fn new(endpoint: Endpoint) -> Result<Self, SettError> {
        let client = DatasetteClient::new(endpoint)?;
        Ok(Self {
            catalog: Arc::new(Catalog::new(client)),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn list_tables(&self) -> Result<Vec<String>, SettError> {
        Ok(self.catalog.list_tables().await?)
    }

    /// Build a fresh plan whose single node is a leaf scan of `name`.
    ///
    /// Schema discovery happens here, so an unknown table fails now rather
    /// than at execution time.
    pub async fn table(&self, name: &str) -> Result<Plan, SettError> {
        let schema = self.catalog.schema_of(name).await?;
        let mut plan = Plan::new();
        plan.table(name, schema);
        Ok(plan)
    }

    /// Compile the subtree at `root` and execute it remotely.
    pub async fn execute(
        &self,
        plan: &Plan,
        root: NodeId,
    ) -> Result<MaterializedTable, SettError> {
        let query = compile(plan, root)?;
        Ok(self.catalog.client().execute(&query).await?)
    }
}
