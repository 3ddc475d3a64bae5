use futures_util::future::join_all;
use std::sync::Arc;

use microql_core::{ContextStack, Invokable, MicroQlError, Plan};

/// Drive every wave of `plan` to completion, writing each query's result
/// into `plan.results` as it finishes (§4.4).
///
/// Waves run strictly in order; within one wave every query's `invoke` is
/// spawned as its own task and raced concurrently via `join_all`, which
/// never cancels a still-running wave-mate on a sibling's error — the
/// whole wave always settles before the first error (if any) is surfaced.
///
/// A query whose result is already present in `plan.results` before this
/// runs is never re-invoked — this is how a resumed snapshot (§4.8) skips
/// the queries it already recorded.
pub async fn execute(plan: &Plan) -> Result<(), MicroQlError> {
    for wave in &plan.waves {
        let mut handles = Vec::with_capacity(wave.len());
        for name in wave {
            if plan.results.get(name).is_some() {
                continue;
            }
            let node = Arc::clone(
                plan.nodes
                    .get(name)
                    .unwrap_or_else(|| panic!("wave referenced unknown query '{name}'")),
            );
            let results = Arc::clone(&plan.results);
            let name = name.clone();
            handles.push(tokio::spawn(async move {
                let outcome = node.invoke(&results, &ContextStack::empty()).await;
                (name, outcome)
            }));
        }

        let mut first_err = None;
        for joined in join_all(handles).await {
            let (name, outcome) =
                joined.map_err(|e| MicroQlError::scheduler(format!("query task panicked: {e}")))?;
            match outcome {
                Ok(value) => plan.results.insert(name, value),
                Err(err) => {
                    tracing::debug!(query = %name, error = %err, "query failed");
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }
    }
    Ok(())
}
