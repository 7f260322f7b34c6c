//! Plugin loading.
//!
//! A plugin source is either the identifier of a module compiled into the binary or the path
//! to a YAML plugin manifest. Identifiers are tried first. Loading a module runs its
//! registration function; loading a manifest registers a [`CommandCheck`]. Either way the
//! load only succeeds if a plugin with the configured name was registered.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;
use thiserror::Error;

use crate::checks::registry::PluginRegistry;
use crate::checks::{CommandCheck, FileCheck, TcpCheck};
use crate::config::{Args, PluginDescriptor};
use crate::resolver::ResolverOverride;
use crate::transport::seconds;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Plugin source {0} is neither a known module nor an existing file")]
    NotFound(String),
    #[error("Invalid plugin manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },
    #[error("Module {module} failed to load: {reason}")]
    Module { module: String, reason: String },
    #[error("{lib} did not register a plugin named {name}")]
    MissingRegistration { lib: String, name: String },
}

/// What a module's registration function gets to construct its plugins with.
pub struct ModuleContext<'a> {
    /// The `args` of the plugin descriptor being loaded.
    pub args: &'a Args,
    pub resolver: &'a Arc<ResolverOverride>,
    pub timeout: Duration,
}

pub type RegisterFn =
    Box<dyn Fn(&ModuleContext<'_>, &mut PluginRegistry) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    name: String,
    command: Vec<String>,
    timeout: Option<f64>,
}

pub struct PluginLoader {
    modules: HashMap<String, RegisterFn>,
    resolver: Arc<ResolverOverride>,
    timeout: Duration,
}

impl PluginLoader {
    /// Creates a loader that knows the built-in `file` and `tcp` modules.
    pub fn new(resolver: Arc<ResolverOverride>, timeout: Duration) -> Self {
        let mut loader = Self {
            modules: HashMap::new(),
            resolver,
            timeout,
        };
        loader.add_module("file", |ctx, registry| {
            registry.register_plugin(Arc::new(FileCheck::new(ctx.args)));
            Ok(())
        });
        loader.add_module("tcp", |ctx, registry| {
            registry.register_plugin(Arc::new(TcpCheck::new(
                ctx.resolver.clone(),
                ctx.timeout,
            )));
            Ok(())
        });
        loader
    }

    /// Makes a module loadable by `id`, replacing any module with the same identifier.
    pub fn add_module<F>(&mut self, id: &str, register: F)
    where
        F: Fn(&ModuleContext<'_>, &mut PluginRegistry) -> Result<(), String> + Send + Sync + 'static,
    {
        self.modules.insert(id.to_string(), Box::new(register));
    }

    /// Loads every descriptor in order. The first failure aborts loading.
    pub fn load_all(
        &self,
        descriptors: &[PluginDescriptor],
        registry: &mut PluginRegistry,
    ) -> Result<(), LoadError> {
        for descriptor in descriptors {
            self.load(descriptor, registry)?;
        }
        Ok(())
    }

    pub fn load(
        &self,
        descriptor: &PluginDescriptor,
        registry: &mut PluginRegistry,
    ) -> Result<(), LoadError> {
        // Register into a scratch registry first, so a module cannot pass the name check on the
        // strength of an earlier registration.
        let mut loaded = PluginRegistry::new();
        match self.modules.get(&descriptor.source) {
            Some(register) => {
                debug!("Loading module {}", descriptor.source);
                let ctx = ModuleContext {
                    args: &descriptor.args,
                    resolver: &self.resolver,
                    timeout: self.timeout,
                };
                register(&ctx, &mut loaded).map_err(|reason| LoadError::Module {
                    module: descriptor.source.clone(),
                    reason,
                })?;
            }
            None => self.load_manifest(Path::new(&descriptor.source), &mut loaded)?,
        }

        if !loaded.contains(&descriptor.name) {
            return Err(LoadError::MissingRegistration {
                lib: descriptor.source.clone(),
                name: descriptor.name.clone(),
            });
        }
        info!("Loaded plugin {} from {}", descriptor.name, descriptor.source);
        registry.merge(loaded);
        Ok(())
    }

    fn load_manifest(&self, path: &Path, registry: &mut PluginRegistry) -> Result<(), LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotFound(path.display().to_string()));
        }
        debug!("Loading plugin manifest {}", path.display());
        let invalid = |reason: String| LoadError::Manifest {
            path: path.to_path_buf(),
            reason,
        };

        let content = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let manifest: Manifest = serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        if manifest.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        let (program, args) = manifest
            .command
            .split_first()
            .ok_or_else(|| invalid("command must not be empty".to_string()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let program = resolve_program(base, program);
        let timeout = seconds(manifest.timeout).unwrap_or(self.timeout);
        registry.register_plugin(Arc::new(CommandCheck::new(
            manifest.name,
            program,
            args.to_vec(),
            timeout,
        )));
        Ok(())
    }
}

/// Resolves a relative program against the manifest directory when it exists there. Anything
/// else is left for the `PATH` lookup.
fn resolve_program(base: &Path, program: &str) -> PathBuf {
    let candidate = base.join(program);
    if Path::new(program).is_relative() && candidate.is_file() {
        candidate
    } else {
        PathBuf::from(program)
    }
}
