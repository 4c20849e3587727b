#![allow(dead_code)]

use std::sync::Arc;

use flowrun::errors::{EngineError, Result};
use flowrun::job::payload::{ArgumentValue, Payload};
use flowrun::tool::{ExecutionContext, InterfaceResult, ToolInterface};

/// A tool that "produces" exactly the output targets the payload asks for.
///
/// Every resolved output target becomes its own result value, so declared
/// cardinalities always line up and validation passes.
pub fn echo_tool() -> Arc<dyn ToolInterface> {
    Arc::new(|payload: &Payload, _ctx: &ExecutionContext| -> Result<InterfaceResult> {
        let mut result = InterfaceResult::default();
        for (name, value) in &payload.outputs {
            if let ArgumentValue::Flat(targets) = value {
                result.result_data.insert(name.clone(), targets.clone());
            }
        }
        Ok(result)
    })
}

/// A tool that always fails with the given message.
pub fn failing_tool(message: &str) -> Arc<dyn ToolInterface> {
    let message = message.to_string();
    Arc::new(move |_payload: &Payload, _ctx: &ExecutionContext| -> Result<InterfaceResult> {
        Err(EngineError::Other(anyhow::anyhow!(message.clone())))
    })
}

/// A tool that fails whenever any input value contains `needle`, and behaves
/// like [`echo_tool`] otherwise. Used to fail a single sample in a run.
pub fn failing_for_value(needle: &str) -> Arc<dyn ToolInterface> {
    let needle = needle.to_string();
    Arc::new(move |payload: &Payload, _ctx: &ExecutionContext| -> Result<InterfaceResult> {
        let poisoned = payload.inputs.values().any(|value| match value {
            ArgumentValue::Flat(values) => values.iter().any(|v| v.contains(&needle)),
            ArgumentValue::Mapped(map) => {
                map.values().flatten().any(|v| v.contains(&needle))
            }
            ArgumentValue::Auto(_) => false,
        });
        if poisoned {
            return Err(EngineError::Other(anyhow::anyhow!(
                "refusing poisoned input '{needle}'"
            )));
        }

        let mut result = InterfaceResult::default();
        for (name, value) in &payload.outputs {
            if let ArgumentValue::Flat(targets) = value {
                result.result_data.insert(name.clone(), targets.clone());
            }
        }
        Ok(result)
    })
}
