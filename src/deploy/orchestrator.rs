//! Local deploy orchestrator.
//!
//! Executes a compiled template against extension channels. Resources are
//! scheduled over the `dependsOn` DAG with in-degree accounting: a resource
//! is dispatched only after every dependency reaches a terminal state, and
//! dependents of a non-succeeded resource are recorded without dispatch.
//! Cancellation stops new dispatches immediately; in-flight operations are
//! asked to cancel through their channel and still run to a terminal state.

use super::channel::{ExtensionChannel, OperationRequest};
use super::protocol::{OperationKind, ProvisioningOperation, ProvisioningState};
use crate::core::emitter::{ParameterDefinition, TemplateDocument, TemplateResource};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// Outcome of one deployment run.
#[derive(Debug)]
pub struct DeployResult {
    pub state: ProvisioningState,
    /// Per-resource operation log, in completion order.
    pub operations: Vec<ProvisioningOperation>,
    /// Evaluated template outputs; populated only on success.
    pub outputs: IndexMap<String, Value>,
    pub error: Option<String>,
}

/// Run a deployment. `channels` maps provider namespaces to their channels;
/// `parameters` overrides declared defaults. Channels are shut down on every
/// exit path.
pub async fn deploy(
    template: &TemplateDocument,
    parameters: &IndexMap<String, Value>,
    channels: FxHashMap<String, Arc<dyn ExtensionChannel>>,
    mut cancel: watch::Receiver<bool>,
) -> DeployResult {
    // Handshake every channel in parallel; a failed namespace fails its
    // resources at dispatch time, siblings proceed
    let mut init_failures: FxHashMap<String, String> = FxHashMap::default();
    let mut init_set: JoinSet<(String, Result<(), String>)> = JoinSet::new();
    for (namespace, channel) in &channels {
        let namespace = namespace.clone();
        let channel = Arc::clone(channel);
        init_set.spawn(async move {
            let outcome = channel.initialize().await;
            (namespace, outcome)
        });
    }
    while let Some(joined) = init_set.join_next().await {
        if let Ok((namespace, Err(reason))) = joined {
            init_failures.insert(namespace, reason);
        }
    }

    let resources = &template.resources;
    let index: FxHashMap<&str, usize> = resources
        .iter()
        .enumerate()
        .map(|(i, r)| (r.symbolic_name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; resources.len()];
    let mut dependents = vec![Vec::new(); resources.len()];
    for (i, resource) in resources.iter().enumerate() {
        for dep in &resource.depends_on {
            if let Some(&j) = index.get(dep.as_str()) {
                in_degree[i] += 1;
                dependents[j].push(i);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..resources.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut final_states: Vec<Option<ProvisioningState>> = vec![None; resources.len()];
    let mut completed: FxHashMap<String, Value> = FxHashMap::default();
    let mut operations: Vec<ProvisioningOperation> = Vec::new();
    let mut remaining = resources.len();

    let mut join_set: JoinSet<(usize, ProvisioningOperation)> = JoinSet::new();
    let mut in_flight: FxHashMap<usize, (String, Arc<dyn ExtensionChannel>)> =
        FxHashMap::default();
    let mut canceled = *cancel.borrow();
    let mut cancel_open = true;

    while remaining > 0 {
        while let Some(i) = ready.pop_front() {
            let resource = &resources[i];
            if canceled {
                record_terminal(
                    i,
                    canceled_operation(&resource.symbolic_name),
                    &mut final_states,
                    &mut operations,
                    &mut remaining,
                    &dependents,
                    &mut in_degree,
                    &mut ready,
                    &mut completed,
                );
                continue;
            }
            if let Some(dep) = resource
                .depends_on
                .iter()
                .find(|dep| dependency_succeeded(dep.as_str(), &index, &final_states) == Some(false))
            {
                record_terminal(
                    i,
                    failed_operation(
                        &resource.symbolic_name,
                        format!("dependency '{}' did not succeed", dep),
                    ),
                    &mut final_states,
                    &mut operations,
                    &mut remaining,
                    &dependents,
                    &mut in_degree,
                    &mut ready,
                    &mut completed,
                );
                continue;
            }

            let namespace = resource
                .resource_type
                .split('/')
                .next()
                .unwrap_or_default()
                .to_string();
            if let Some(reason) = init_failures.get(&namespace) {
                record_terminal(
                    i,
                    failed_operation(&resource.symbolic_name, reason.clone()),
                    &mut final_states,
                    &mut operations,
                    &mut remaining,
                    &dependents,
                    &mut in_degree,
                    &mut ready,
                    &mut completed,
                );
                continue;
            }
            let Some(channel) = channels.get(&namespace) else {
                record_terminal(
                    i,
                    failed_operation(
                        &resource.symbolic_name,
                        format!("no extension registered for namespace '{}'", namespace),
                    ),
                    &mut final_states,
                    &mut operations,
                    &mut remaining,
                    &dependents,
                    &mut in_degree,
                    &mut ready,
                    &mut completed,
                );
                continue;
            };

            let context = EvalContext {
                parameters,
                defaults: &template.parameters,
                completed: &completed,
            };
            let request = OperationRequest {
                resource: resource.symbolic_name.clone(),
                resource_type: resource.resource_type.clone(),
                api_version: resource.api_version.clone(),
                operation: OperationKind::Create,
                properties: operation_payload(resource, &context),
            };
            let channel = Arc::clone(channel);
            in_flight.insert(i, (resource.symbolic_name.clone(), Arc::clone(&channel)));
            join_set.spawn(async move { (i, run_operation(channel, request).await) });
        }

        if remaining == 0 {
            break;
        }
        if join_set.is_empty() {
            // Unsatisfiable edges; compilation gates cycles so this only
            // guards against hand-edited templates
            for i in 0..resources.len() {
                if final_states[i].is_none() {
                    final_states[i] = Some(ProvisioningState::Failed);
                    operations.push(failed_operation(
                        &resources[i].symbolic_name,
                        "unsatisfiable dependency graph".to_string(),
                    ));
                    remaining -= 1;
                }
            }
            break;
        }

        tokio::select! {
            biased;
            changed = cancel.changed(), if cancel_open && !canceled => {
                match changed {
                    Ok(()) => {
                        if *cancel.borrow() {
                            canceled = true;
                            for (name, channel) in in_flight.values() {
                                let _ = channel.cancel(name).await;
                            }
                        }
                    }
                    Err(_) => cancel_open = false,
                }
            }
            joined = join_set.join_next() => {
                let Some(Ok((i, operation))) = joined else { continue };
                in_flight.remove(&i);
                record_terminal(
                    i,
                    operation,
                    &mut final_states,
                    &mut operations,
                    &mut remaining,
                    &dependents,
                    &mut in_degree,
                    &mut ready,
                    &mut completed,
                );
            }
        }
    }

    for channel in channels.values() {
        let _ = channel.shutdown().await;
    }

    let state = aggregate_state(&operations);
    let error = match state {
        ProvisioningState::Failed => operations
            .iter()
            .find(|op| op.state == ProvisioningState::Failed)
            .map(|op| {
                format!(
                    "{}: {}",
                    op.resource,
                    op.error.as_deref().unwrap_or("operation failed")
                )
            }),
        ProvisioningState::Canceled => Some("deployment canceled".to_string()),
        _ => None,
    };
    let outputs = if state == ProvisioningState::Succeeded {
        let context = EvalContext {
            parameters,
            defaults: &template.parameters,
            completed: &completed,
        };
        template
            .outputs
            .iter()
            .map(|(name, output)| (name.clone(), substitute(&output.value, &context)))
            .collect()
    } else {
        IndexMap::new()
    };

    DeployResult {
        state,
        operations,
        outputs,
        error,
    }
}

/// Aggregate: Succeeded iff every operation succeeded, Failed if any failed,
/// otherwise Canceled.
fn aggregate_state(operations: &[ProvisioningOperation]) -> ProvisioningState {
    if operations
        .iter()
        .all(|op| op.state == ProvisioningState::Succeeded)
    {
        ProvisioningState::Succeeded
    } else if operations
        .iter()
        .any(|op| op.state == ProvisioningState::Failed)
    {
        ProvisioningState::Failed
    } else {
        ProvisioningState::Canceled
    }
}

fn dependency_succeeded(
    dep: &str,
    index: &FxHashMap<&str, usize>,
    final_states: &[Option<ProvisioningState>],
) -> Option<bool> {
    let &i = index.get(dep)?;
    final_states[i].map(|state| state == ProvisioningState::Succeeded)
}

#[allow(clippy::too_many_arguments)]
fn record_terminal(
    i: usize,
    operation: ProvisioningOperation,
    final_states: &mut [Option<ProvisioningState>],
    operations: &mut Vec<ProvisioningOperation>,
    remaining: &mut usize,
    dependents: &[Vec<usize>],
    in_degree: &mut [usize],
    ready: &mut VecDeque<usize>,
    completed: &mut FxHashMap<String, Value>,
) {
    if final_states[i].is_some() {
        return;
    }
    final_states[i] = Some(operation.state);
    if operation.state == ProvisioningState::Succeeded {
        completed.insert(
            operation.resource.clone(),
            json!({
                "properties": operation.properties.clone().unwrap_or(Value::Null),
            }),
        );
    }
    operations.push(operation);
    *remaining -= 1;
    for &dependent in &dependents[i] {
        in_degree[dependent] -= 1;
        if in_degree[dependent] == 0 {
            ready.push_back(dependent);
        }
    }
}

fn failed_operation(resource: &str, error: String) -> ProvisioningOperation {
    ProvisioningOperation {
        resource: resource.to_string(),
        kind: OperationKind::Create,
        state: ProvisioningState::Failed,
        properties: None,
        error: Some(error),
    }
}

fn canceled_operation(resource: &str) -> ProvisioningOperation {
    ProvisioningOperation {
        resource: resource.to_string(),
        kind: OperationKind::Create,
        state: ProvisioningState::Canceled,
        properties: None,
        error: None,
    }
}

/// Submit one operation and wait for its terminal update.
async fn run_operation(
    channel: Arc<dyn ExtensionChannel>,
    request: OperationRequest,
) -> ProvisioningOperation {
    let resource = request.resource.clone();
    let (tx, mut rx) = mpsc::channel(16);
    if let Err(reason) = channel.submit(request, tx).await {
        return failed_operation(&resource, reason);
    }
    while let Some(update) = rx.recv().await {
        if update.state.is_terminal() {
            return ProvisioningOperation {
                resource,
                kind: OperationKind::Create,
                state: update.state,
                properties: update.properties,
                error: update.error,
            };
        }
    }
    failed_operation(
        &resource,
        "extension channel closed before a terminal state".to_string(),
    )
}

// ============================================================================
// Deployment-time expression evaluation
// ============================================================================

struct EvalContext<'a> {
    parameters: &'a IndexMap<String, Value>,
    defaults: &'a IndexMap<String, ParameterDefinition>,
    completed: &'a FxHashMap<String, Value>,
}

fn operation_payload(resource: &TemplateResource, context: &EvalContext<'_>) -> Value {
    let mut payload = serde_json::Map::new();
    payload.insert("name".to_string(), substitute(&resource.name, context));
    if let Some(location) = &resource.location {
        payload.insert("location".to_string(), substitute(location, context));
    }
    if let Some(tags) = &resource.tags {
        payload.insert("tags".to_string(), substitute(tags, context));
    }
    if let Some(properties) = &resource.properties {
        payload.insert("properties".to_string(), substitute(properties, context));
    }
    Value::Object(payload)
}

/// Replace `[parameters('x')]` and `[reference('sym').path]` strings with
/// their deployment-time values, recursively.
fn substitute(value: &Value, context: &EvalContext<'_>) -> Value {
    match value {
        Value::String(text) => evaluate_function(text, context).unwrap_or_else(|| value.clone()),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| substitute(item, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), substitute(item, context)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

fn evaluate_function(text: &str, context: &EvalContext<'_>) -> Option<Value> {
    let inner = text.strip_prefix('[')?.strip_suffix(']')?;
    if let Some(rest) = inner.strip_prefix("parameters('") {
        let (name, path) = rest.split_once("')")?;
        let value = context
            .parameters
            .get(name)
            .cloned()
            .or_else(|| context.defaults.get(name)?.default_value.clone())?;
        return Some(walk_path(value, path));
    }
    if let Some(rest) = inner.strip_prefix("reference('") {
        let (name, path) = rest.split_once("')")?;
        let value = context.completed.get(name).cloned()?;
        return Some(walk_path(value, path));
    }
    None
}

fn walk_path(value: Value, path: &str) -> Value {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(mut map) => map.remove(segment).unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    current
}
