//! Sandboxed query evaluation over Figma documents
//!
//! A query runs on its own OS thread with a large stack. The document is copied into a
//! fresh interpreter heap, indexed, and bound to the helper library; the result is
//! stripped of geometry while it is converted back to JSON. Both the interpreter
//! (deadline and abort flag) and an async watchdog enforce the time budget.

mod helpers;
mod index;
mod mode;
mod strip;

pub use helpers::{helper_names, NodeHelpers};
pub use index::NodeIndex;
pub use mode::QueryMode;
pub use strip::{export_stripped, strip_heavy_data, GEOMETRY_PLACEHOLDER, MAX_DEPTH_PLACEHOLDER};

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::script::{parse_expression_program, parse_statement_program, Budget, EvalError, Interpreter};
use crate::types::{FileResponse, QueryResponse};

/// Stack size of evaluation threads.
const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

/// Runs queries with a fixed time budget and result depth.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    timeout: Duration,
    max_depth: usize,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new(&QueryConfig::default())
    }
}

impl QueryEngine {
    pub fn new(config: &QueryConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_depth: config.max_result_depth,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Evaluate `query` against a fetched file and build the tool payload.
    pub async fn query_file(&self, file: FileResponse, file_key: &str, query: &str) -> Result<QueryResponse> {
        let result = self.evaluate(file.document, query).await?;
        Ok(QueryResponse {
            file_name: file.name,
            file_key: file_key.to_string(),
            result,
        })
    }

    /// Evaluate `query` against `document`. `Ok(None)` means the program yielded `undefined`.
    pub async fn evaluate(&self, document: serde_json::Value, query: &str) -> Result<Option<serde_json::Value>> {
        let abort = Arc::new(AtomicBool::new(false));
        let budget = Budget::new(self.timeout, abort.clone());
        let query = query.trim().to_string();
        let max_depth = self.max_depth;
        let (tx, rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("query-eval".into())
            .stack_size(EVAL_STACK_SIZE)
            .spawn(move || {
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    evaluate_blocking(&document, &query, budget, max_depth)
                }));
                // the receiver is gone once the watchdog fired
                let _ = tx.send(outcome);
            })?;

        let timeout_err = || Error::QueryTimeout {
            budget_ms: self.timeout.as_millis() as u64,
        };

        match tokio::time::timeout(self.timeout, rx).await {
            Err(_) => {
                abort.store(true, Ordering::Relaxed);
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "query watchdog fired");
                Err(timeout_err())
            }
            Ok(Err(_)) => Err(Error::Query("Query evaluation ended unexpectedly".into())),
            Ok(Ok(Err(_panic))) => {
                tracing::error!("query evaluation panicked");
                Err(Error::Query("Internal error while evaluating query".into()))
            }
            Ok(Ok(Ok(Err(EvalError::Timeout)))) => Err(timeout_err()),
            Ok(Ok(Ok(Err(err)))) => Err(Error::Query(err.to_string())),
            Ok(Ok(Ok(Ok(result)))) => Ok(result),
        }
    }
}

/// Parse, evaluate and export on the current thread. Deep documents and programs need
/// a large stack, see [`QueryEngine::evaluate`].
pub fn evaluate_blocking(
    document: &serde_json::Value,
    query: &str,
    budget: Budget,
    max_depth: usize,
) -> std::result::Result<Option<serde_json::Value>, EvalError> {
    let query = query.trim();
    let mode = QueryMode::detect(query);
    tracing::debug!(?mode, "evaluating query");
    let program = match mode {
        QueryMode::Expression => parse_expression_program(query)?,
        QueryMode::Statements => parse_statement_program(query)?,
    };

    let mut interp = Interpreter::new(budget);
    let root = interp.import_json(document);
    NodeHelpers::install(&mut interp, root);

    let value = interp.run(&program)?;
    export_stripped(&mut interp, &value, max_depth).map_err(|abrupt| interp.to_eval_error(abrupt))
}
