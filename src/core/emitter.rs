//! Template emission: lowers a checked program to the JSON deployment
//! template and its companion parameters document.
//!
//! Emission is gated on diagnostics. Any error-severity diagnostic refuses
//! the whole document; warnings never block. Output is deterministic for
//! identical input, including the content hash.

use super::binder::BindResult;
use super::parser::{Decl, Expr, SyntaxTree};
use super::types::{DeploymentScope, Diagnostic, Severity};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const CONTENT_VERSION: &str = "1.0.0.0";
const GENERATOR_NAME: &str = "armature";

// ============================================================================
// Document shapes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDocument {
    #[serde(rename = "$schema")]
    pub schema: String,
    #[serde(rename = "contentVersion")]
    pub content_version: String,
    pub metadata: TemplateMetadata,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, ParameterDefinition>,
    pub resources: Vec<TemplateResource>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, OutputDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMetadata {
    #[serde(rename = "_generator")]
    pub generator: GeneratorInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorInfo {
    pub name: String,
    pub version: String,
    #[serde(rename = "templateHash")]
    pub template_hash: String,
}

/// One entry of the template's `resources` array. The symbolic name is
/// compiler-internal (the orchestrator keys operations by it) and never
/// serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateResource {
    #[serde(skip)]
    pub symbolic_name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub name: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
    #[serde(
        rename = "dependsOn",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(rename = "type")]
    pub parameter_type: String,
    #[serde(rename = "defaultValue", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDefinition {
    #[serde(rename = "type")]
    pub output_type: String,
    pub value: Value,
}

/// Companion parameters file. `template` points back at the source the
/// parameters apply to; the deploy command resolves it relative to the
/// parameters file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParametersDocument {
    #[serde(rename = "$schema")]
    pub schema: String,
    #[serde(rename = "contentVersion")]
    pub content_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterValue {
    pub value: Value,
}

fn schema_url(scope: DeploymentScope) -> &'static str {
    match scope {
        DeploymentScope::Tenant => {
            "https://schema.management.azure.com/schemas/2019-08-01/tenantDeploymentTemplate.json#"
        }
        DeploymentScope::ManagementGroup => {
            "https://schema.management.azure.com/schemas/2019-08-01/managementGroupDeploymentTemplate.json#"
        }
        DeploymentScope::Subscription => {
            "https://schema.management.azure.com/schemas/2018-05-01/subscriptionDeploymentTemplate.json#"
        }
        DeploymentScope::ResourceGroup | DeploymentScope::None => {
            "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#"
        }
    }
}

pub const PARAMETERS_SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2019-04-01/deploymentParameters.json#";

// ============================================================================
// Emission
// ============================================================================

/// Lower a checked program to a template document. Refuses when any
/// error-severity diagnostic exists.
pub fn emit(
    tree: &SyntaxTree,
    bound: &BindResult,
    scope: DeploymentScope,
    diagnostics: &[Diagnostic],
) -> Result<TemplateDocument, String> {
    if let Some(error) = diagnostics.iter().find(|d| d.severity == Severity::Error) {
        return Err(format!("emission blocked: {}", error));
    }

    let lowerer = Lowerer { tree, bound };
    let dependencies = bound.resource_dependencies();

    let mut parameters = IndexMap::new();
    let mut resources = Vec::new();
    let mut outputs = IndexMap::new();

    for decl in &tree.decls {
        match decl {
            Decl::Param {
                name,
                type_name,
                default,
                ..
            } => {
                parameters.insert(
                    name.clone(),
                    ParameterDefinition {
                        parameter_type: type_name.clone(),
                        default_value: default.as_ref().map(|e| lowerer.lower(e)),
                    },
                );
            }
            Decl::Resource {
                symbolic_name,
                type_literal,
                body,
                ..
            } => {
                resources.push(lowerer.lower_resource(
                    symbolic_name,
                    type_literal,
                    body,
                    dependencies
                        .get(symbolic_name)
                        .cloned()
                        .unwrap_or_default(),
                )?);
            }
            Decl::Output {
                name,
                type_name,
                value,
                ..
            } => {
                outputs.insert(
                    name.clone(),
                    OutputDefinition {
                        output_type: type_name.clone(),
                        value: lowerer.lower(value),
                    },
                );
            }
            _ => {}
        }
    }

    let template_hash = hash_resources(&resources)?;
    Ok(TemplateDocument {
        schema: schema_url(scope).to_string(),
        content_version: CONTENT_VERSION.to_string(),
        metadata: TemplateMetadata {
            generator: GeneratorInfo {
                name: GENERATOR_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                template_hash,
            },
        },
        parameters,
        resources,
        outputs,
    })
}

/// Companion parameters document with declared defaults filled in.
pub fn emit_parameters(tree: &SyntaxTree, bound: &BindResult) -> ParametersDocument {
    let lowerer = Lowerer { tree, bound };
    let mut parameters = IndexMap::new();
    for decl in &tree.decls {
        if let Decl::Param { name, default, .. } = decl {
            if let Some(default) = default {
                parameters.insert(
                    name.clone(),
                    ParameterValue {
                        value: lowerer.lower(default),
                    },
                );
            }
        }
    }
    ParametersDocument {
        schema: PARAMETERS_SCHEMA.to_string(),
        content_version: CONTENT_VERSION.to_string(),
        template: None,
        parameters,
    }
}

/// Content hash over the serialized resource array only, so metadata changes
/// never feed back into the hash.
fn hash_resources(resources: &[TemplateResource]) -> Result<String, String> {
    let serialized =
        serde_json::to_string(resources).map_err(|e| format!("serialization failed: {}", e))?;
    Ok(format!("blake3:{}", blake3::hash(serialized.as_bytes()).to_hex()))
}

struct Lowerer<'a> {
    tree: &'a SyntaxTree,
    bound: &'a BindResult,
}

impl Lowerer<'_> {
    fn lower_resource(
        &self,
        symbolic_name: &str,
        type_literal: &str,
        body: &Expr,
        depends_on: Vec<String>,
    ) -> Result<TemplateResource, String> {
        let (resource_type, api_version) = type_literal
            .split_once('@')
            .ok_or_else(|| format!("resource '{}' has no api version", symbolic_name))?;
        let Expr::Object { properties, .. } = body else {
            return Err(format!("resource '{}' body is not an object", symbolic_name));
        };

        let mut name = Value::Null;
        let mut location = None;
        let mut tags = None;
        let mut resource_properties = None;
        for (key, value) in properties {
            let lowered = self.lower(value);
            match key.as_str() {
                "name" => name = lowered,
                "location" => location = Some(lowered),
                "tags" => tags = Some(lowered),
                "properties" => resource_properties = Some(lowered),
                _ => {}
            }
        }

        Ok(TemplateResource {
            symbolic_name: symbolic_name.to_string(),
            resource_type: resource_type.to_string(),
            api_version: api_version.to_string(),
            name,
            location,
            tags,
            properties: resource_properties,
            depends_on,
        })
    }

    /// Fold statically evaluable expressions to JSON values; everything that
    /// depends on deployment-time state lowers to a function expression
    /// string.
    fn lower(&self, expr: &Expr) -> Value {
        match expr {
            Expr::StringLit { value, .. } => json!(value),
            Expr::IntLit { value, .. } => json!(value),
            Expr::BoolLit { value, .. } => json!(value),
            Expr::NullLit { .. } => Value::Null,
            Expr::Array { items, .. } => {
                Value::Array(items.iter().map(|item| self.lower(item)).collect())
            }
            Expr::Object { properties, .. } => Value::Object(
                properties
                    .iter()
                    .map(|(key, value)| (key.clone(), self.lower(value)))
                    .collect(),
            ),
            Expr::Identifier { name, .. } => self.lower_reference(name, &[]),
            Expr::Member { base, path, .. } => match &**base {
                Expr::Identifier { name, .. } => self.lower_reference(name, path),
                other => self.lower(other),
            },
        }
    }

    fn lower_reference(&self, name: &str, path: &[String]) -> Value {
        use super::binder::SymbolKind;
        let Some(symbol) = self.bound.table.get(name) else {
            return Value::Null;
        };
        match symbol.kind {
            SymbolKind::Parameter => {
                let suffix = function_path(path);
                json!(format!("[parameters('{}'){}]", name, suffix))
            }
            SymbolKind::Variable => {
                // Variables inline; emission is error-gated so the reference
                // graph is acyclic here
                let value = match self.tree.decls.get(symbol.decl_index) {
                    Some(Decl::Var { value, .. }) => self.lower(value),
                    _ => Value::Null,
                };
                walk_json_path(value, path)
            }
            SymbolKind::Resource | SymbolKind::Module => {
                let suffix = function_path(path);
                json!(format!("[reference('{}'){}]", name, suffix))
            }
            _ => Value::Null,
        }
    }
}

fn function_path(path: &[String]) -> String {
    path.iter().map(|segment| format!(".{}", segment)).collect()
}

fn walk_json_path(value: Value, path: &[String]) -> Value {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(mut map) => map.remove(segment).unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    current
}
