//! Job types shipped with the binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use conductor_core::app::RuntimeBuilder;
use conductor_core::domain::{JobDefinition, RetryLimit, TaskError};
use conductor_core::typed::{JobCallbacks, Task, TaskContext};

pub const SAMPLE: &str = "Sample";

/// Copies the message's `input` into the store.
#[derive(Default)]
struct Fetch;

#[async_trait]
impl Task for Fetch {
    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let input = ctx.get("input").cloned().unwrap_or(Value::Null);
        ctx.set("fetched", json!({ "value": input }))
    }
}

/// Upper-cases `fetched.value`. Fails its first `failures` runs.
struct Transform {
    runs: Arc<AtomicU32>,
    failures: u32,
}

#[async_trait]
impl Task for Transform {
    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        ctx.assert_not_cancelled().await?;
        if self.runs.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(TaskError::failed("upstream not ready"));
        }
        let value = ctx
            .get("fetched")
            .and_then(|f| f.get("value"))
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::fatal("fetched value is not a string"))?
            .to_uppercase();
        ctx.set("transformed", value)
    }

    async fn on_error(&mut self, ctx: &mut TaskContext<'_>, error: &TaskError) {
        info!(retries = ctx.retries(), may_retry = ctx.may_retry(), %error, "transform failed");
    }
}

#[derive(Default)]
struct Store;

#[async_trait]
impl Task for Store {
    async fn run(&mut self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let stored = ctx.get("transformed").cloned().unwrap_or(Value::Null);
        info!(job_id = ctx.job_id(), %stored, "stored result");
        ctx.set("stored", true)
    }
}

struct LogCallbacks;

#[async_trait]
impl JobCallbacks for LogCallbacks {
    async fn on_success(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        info!(job_id = ctx.job_id(), outputs = ctx.data().len(), "sample job succeeded");
        Ok(())
    }

    async fn on_error(&self, ctx: &mut TaskContext<'_>) -> Result<(), TaskError> {
        let message = ctx.error().map(|e| e.message.clone()).unwrap_or_default();
        info!(job_id = ctx.job_id(), error = %message, "sample job failed");
        Ok(())
    }
}

/// `transform_failures`: how many times `transform` fails before succeeding.
pub fn register(builder: RuntimeBuilder, transform_failures: u32) -> anyhow::Result<RuntimeBuilder> {
    let definition = JobDefinition::new(SAMPLE)
        .declare_tasks(["fetch", "transform", "store"])?
        .with_max_retries(RetryLimit::Limited(2))
        .with_callbacks(LogCallbacks);

    let runs = Arc::new(AtomicU32::new(0));
    let builder = builder
        .register_job(definition)?
        .register_default_task::<Fetch>(Some(SAMPLE), "fetch")?
        .register_task(Some(SAMPLE), "transform", move || Transform {
            runs: Arc::clone(&runs),
            failures: transform_failures,
        })?
        .register_default_task::<Store>(None, "store")?;
    Ok(builder)
}
