//! The pluggable pack-execution boundary: a function
//! from `(inputs, timebox, max_cost)` to `(envelope_data, actual_cost)`,
//! with `actual_cost <= max_cost` enforced here rather than trusted from the
//! implementation.

use std::time::Duration;

use dpp_types::Money;
use futures::future::BoxFuture;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("pack execution failed: {0}")]
    Failed(String),
    #[error("pack execution exceeded its timebox of {0:?}")]
    TimedOut(Duration),
    #[error("executor reported actual_cost {actual} greater than max_cost {max}")]
    CostOverrun { actual: i64, max: i64 },
}

pub struct ExecutionRequest {
    pub pack_type: String,
    pub inputs: serde_json::Value,
    pub timebox: Duration,
    pub max_cost: Money,
}

pub struct ExecutionOutput {
    pub data: serde_json::Value,
    pub actual_cost: Money,
    pub logs: Vec<String>,
}

/// Implemented once per supported `pack_type` in production; `main.rs`
/// selects the implementation by `pack_type` before handing it to the
/// Worker.
pub trait PackExecutor: Send + Sync {
    fn execute<'a>(&'a self, request: &'a ExecutionRequest) -> BoxFuture<'a, Result<ExecutionOutput, ExecutorError>>;
}

/// Runs `executor` under `request.timebox` and enforces the cost ceiling on
/// the way out, regardless of what the executor itself claims to enforce.
pub async fn run_with_enforcement(
    executor: &dyn PackExecutor,
    request: &ExecutionRequest,
) -> Result<ExecutionOutput, ExecutorError> {
    let timebox = request.timebox;
    let outcome = tokio::time::timeout(timebox, executor.execute(request))
        .await
        .map_err(|_| ExecutorError::TimedOut(timebox))??;

    if outcome.actual_cost > request.max_cost {
        return Err(ExecutorError::CostOverrun {
            actual: outcome.actual_cost.micros(),
            max: request.max_cost.micros(),
        });
    }

    Ok(outcome)
}

/// A deterministic executor for tests and local development: echoes the
/// inputs back as `data` and charges a fixed fraction of `max_cost`.
pub struct MockExecutor {
    pub cost_fraction_micros_per_unit: i64,
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self {
            cost_fraction_micros_per_unit: 750_000, // 75% of max_cost, in micros-per-unit
        }
    }
}

impl PackExecutor for MockExecutor {
    fn execute<'a>(&'a self, request: &'a ExecutionRequest) -> BoxFuture<'a, Result<ExecutionOutput, ExecutorError>> {
        Box::pin(async move {
            let actual = Money::from_micros(
                (request.max_cost.micros() as i128 * self.cost_fraction_micros_per_unit as i128
                    / dpp_types::MICROS_PER_UNIT as i128) as i64,
            );
            Ok(ExecutionOutput {
                data: request.inputs.clone(),
                actual_cost: actual,
                logs: vec!["mock executor: echoed inputs".to_string()],
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_executor_charges_a_fraction_of_max_cost_and_echoes_inputs() {
        let executor = MockExecutor::default();
        let request = ExecutionRequest {
            pack_type: "demo.echo".to_string(),
            inputs: serde_json::json!({"a": 1}),
            timebox: Duration::from_secs(5),
            max_cost: Money::from_micros(200_000),
        };

        let output = run_with_enforcement(&executor, &request).await.unwrap();
        assert_eq!(output.actual_cost, Money::from_micros(150_000));
        assert_eq!(output.data, serde_json::json!({"a": 1}));
    }

    struct OverchargingExecutor;
    impl PackExecutor for OverchargingExecutor {
        fn execute<'a>(&'a self, request: &'a ExecutionRequest) -> BoxFuture<'a, Result<ExecutionOutput, ExecutorError>> {
            let max = request.max_cost;
            Box::pin(async move {
                Ok(ExecutionOutput {
                    data: serde_json::Value::Null,
                    actual_cost: max.checked_add(Money::from_micros(1)).unwrap(),
                    logs: vec![],
                })
            })
        }
    }

    #[tokio::test]
    async fn cost_overrun_is_rejected_even_if_the_executor_does_not_self_enforce() {
        let executor = OverchargingExecutor;
        let request = ExecutionRequest {
            pack_type: "demo.echo".to_string(),
            inputs: serde_json::Value::Null,
            timebox: Duration::from_secs(5),
            max_cost: Money::from_micros(100),
        };

        let err = run_with_enforcement(&executor, &request).await.unwrap_err();
        assert!(matches!(err, ExecutorError::CostOverrun { .. }));
    }
}
