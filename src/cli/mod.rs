//! CLI subcommands — build, scope, deploy.

use crate::core::cache::CompilationCache;
use crate::core::checker::BuiltinTypeProvider;
use crate::core::compilation::{Compilation, CompilationManager, FileSystemProvider};
use crate::core::config::BuildConfig;
use crate::core::emitter::ParametersDocument;
use crate::core::requests;
use crate::core::types::DocumentId;
use crate::deploy::channel::{ExtensionChannel, ProcessChannel};
use crate::deploy::dispatch::{dispatch as dispatch_extensions, ConfigResolver};
use crate::deploy::orchestrator::{self, DeployResult};
use crate::deploy::protocol::ProvisioningState;
use clap::Subcommand;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a source file to a deployment template
    Build {
        /// Path to the .arm source file
        file: PathBuf,
    },

    /// Resolve a source file's deployment scope and print the response
    Scope {
        /// Path to the .arm source file
        file: PathBuf,
    },

    /// Deploy a template locally through extension binaries
    Deploy {
        /// Path to the parameters file naming the template source
        parameters_file: PathBuf,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Build { file } => cmd_build(&file),
        Commands::Scope { file } => cmd_scope(&file),
        Commands::Deploy { parameters_file } => cmd_deploy(&parameters_file),
    }
}

fn cmd_build(file: &Path) -> Result<(), String> {
    let id = DocumentId::new(file.to_string_lossy().into_owned());
    let compilation = Compilation::compile(id, &FileSystemProvider, &BuiltinTypeProvider)?;

    for diagnostic in compilation.diagnostics() {
        eprintln!("  {}", diagnostic);
    }
    if compilation.has_errors() {
        let errors = compilation
            .diagnostics()
            .iter()
            .filter(|d| d.severity == crate::core::types::Severity::Error)
            .count();
        return Err(format!("{} error(s)", errors));
    }

    let template = compilation.emit_template()?;
    let text = serde_json::to_string_pretty(&template)
        .map_err(|e| format!("serialization failed: {}", e))?;
    let out_path = file.with_extension("json");
    std::fs::write(&out_path, text)
        .map_err(|e| format!("cannot write {}: {}", out_path.display(), e))?;
    println!("Wrote {}", out_path.display());
    Ok(())
}

fn cmd_scope(file: &Path) -> Result<(), String> {
    let manager = CompilationManager::new();
    let cache = CompilationCache::new();
    let id = DocumentId::new(file.to_string_lossy().into_owned());
    let response = requests::resolve_scope(
        &manager,
        &cache,
        &id,
        &FileSystemProvider,
        &BuiltinTypeProvider,
        BuildConfig::load_for(file),
    );
    let text = serde_json::to_string_pretty(&response)
        .map_err(|e| format!("serialization failed: {}", e))?;
    println!("{}", text);
    Ok(())
}

fn cmd_deploy(parameters_file: &Path) -> Result<(), String> {
    let text = std::fs::read_to_string(parameters_file)
        .map_err(|e| format!("cannot read {}: {}", parameters_file.display(), e))?;
    let document: ParametersDocument = serde_json::from_str(&text)
        .map_err(|e| format!("invalid parameters file: {}", e))?;
    let template_ref = document
        .template
        .as_deref()
        .ok_or("parameters file does not name a template source")?;
    let source_path = parameters_file
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(template_ref);

    let config = BuildConfig::load_for(&source_path)?;
    if !config.experimental_features.local_deploy {
        return Err(format!(
            "local deploy is disabled for {}; set experimentalFeatures.localDeploy to true in {}",
            source_path.display(),
            crate::core::config::CONFIG_FILE_NAME
        ));
    }

    let manager = CompilationManager::new();
    let cache = CompilationCache::new();
    let id = DocumentId::new(source_path.to_string_lossy().into_owned());
    // Claim a compilation stashed by a prior scope resolution; fall back to
    // compiling fresh
    let compilation = match cache.find_and_remove(&id) {
        Some(compilation) => compilation,
        None => manager.get_or_create(&id, &FileSystemProvider, &BuiltinTypeProvider)?,
    };

    if compilation.has_errors() {
        for diagnostic in compilation.diagnostics() {
            eprintln!("  {}", diagnostic);
        }
        return Err("source has errors; nothing deployed".to_string());
    }
    let template = compilation.emit_template()?;

    let references = dispatch_extensions(&compilation, &ConfigResolver::new(&config));
    let parameters: IndexMap<String, serde_json::Value> = document
        .parameters
        .iter()
        .map(|(name, parameter)| (name.clone(), parameter.value.clone()))
        .collect();

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("cannot start async runtime: {}", e))?;
    let result: DeployResult = runtime.block_on(async {
        let mut channels: FxHashMap<String, Arc<dyn ExtensionChannel>> = FxHashMap::default();
        for reference in &references {
            match ProcessChannel::spawn(reference) {
                Ok(channel) => {
                    channels.insert(reference.namespace.clone(), Arc::new(channel));
                }
                Err(reason) => eprintln!("  {}", reason),
            }
        }

        let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = cancel_tx.send(true);
            }
        });

        orchestrator::deploy(&template, &parameters, channels, cancel_rx).await
    });

    for operation in &result.operations {
        match &operation.error {
            Some(error) => println!("  {:<10} {}  ({})", operation.state, operation.resource, error),
            None => println!("  {:<10} {}", operation.state, operation.resource),
        }
    }
    for (name, value) in &result.outputs {
        println!("  output {} = {}", name, value);
    }

    if result.state == ProvisioningState::Succeeded {
        println!("Deployment succeeded");
        Ok(())
    } else {
        Err(result
            .error
            .unwrap_or_else(|| "deployment did not succeed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_deploy_refused_without_feature_gate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.arm"),
            "resource dns 'Microsoft.Network/dnsZones@2018-05-01' = { name: 'name', location: 'global' }",
        )
        .unwrap();
        let params_path = dir.path().join("main.parameters.json");
        let mut file = std::fs::File::create(&params_path).unwrap();
        write!(
            file,
            r#"{{ "$schema": "{}", "contentVersion": "1.0.0.0", "template": "main.arm", "parameters": {{}} }}"#,
            crate::core::emitter::PARAMETERS_SCHEMA
        )
        .unwrap();
        drop(file);

        let err = cmd_deploy(&params_path).unwrap_err();
        assert!(err.contains("localDeploy"));
    }

    #[test]
    fn test_cli_build_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("main.arm");
        std::fs::write(
            &source,
            "resource dns 'Microsoft.Network/dnsZones@2018-05-01' = { name: 'name', location: 'global' }",
        )
        .unwrap();

        cmd_build(&source).unwrap();

        let template: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("main.json")).unwrap())
                .unwrap();
        assert_eq!(template["resources"][0]["type"], "Microsoft.Network/dnsZones");
    }

    #[test]
    fn test_cli_build_refuses_on_errors() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("main.arm");
        std::fs::write(&source, "var broken = ").unwrap();
        assert!(cmd_build(&source).is_err());
        assert!(!dir.path().join("main.json").exists());
    }

    #[test]
    fn test_cli_deploy_missing_template_field() {
        let dir = tempfile::tempdir().unwrap();
        let params_path = dir.path().join("params.json");
        std::fs::write(
            &params_path,
            r#"{ "$schema": "s", "contentVersion": "1.0.0.0", "parameters": {} }"#,
        )
        .unwrap();
        let err = cmd_deploy(&params_path).unwrap_err();
        assert!(err.contains("template"));
    }
}
