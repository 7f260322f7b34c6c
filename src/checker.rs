use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, FutureExt, StreamExt};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::checks::loader::{LoadError, ModuleContext, PluginLoader};
use crate::checks::registry::PluginRegistry;
use crate::checks::{http, websocket};
use crate::config::{CheckDescriptor, Config};
use crate::report::Report;
use crate::resolver::ResolverOverride;
use crate::transport::{NetClient, Transport};

pub const INVALID_SCHEME_MSG: &str = "invalid scheme";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to load plugins: {0}")]
    Load(#[from] LoadError),
}

type ExtraModule = (
    String,
    Arc<dyn Fn(&ModuleContext<'_>, &mut PluginRegistry) -> Result<(), String> + Send + Sync>,
);

/// Runs the checks of a [`Config`] and collects one [`Report`] per check.
///
/// A run has four phases: install the DNS override, load the plugins, dispatch every check,
/// and expose the reports. Only the first two can fail the run; a failing check just yields a
/// failed report.
pub struct Checker<'a> {
    config: &'a Config,
    timeout: Duration,
    jobs: usize,
    transport: Option<Arc<dyn Transport>>,
    modules: Vec<ExtraModule>,
    resolver: Arc<ResolverOverride>,
    registry: Arc<PluginRegistry>,
    reports: Vec<Report<'a>>,
}

impl<'a> Checker<'a> {
    pub fn new(config: &'a Config) -> Self {
        Checker {
            config,
            timeout: Duration::from_secs(10),
            jobs: 1,
            transport: None,
            modules: Vec::new(),
            resolver: Arc::new(ResolverOverride::default()),
            registry: Arc::new(PluginRegistry::new()),
            reports: Vec::new(),
        }
    }

    /// Default timeout for network operations of checks that do not set one.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of checks allowed in flight at once. Reports keep declaration order regardless.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Replaces the network client. By default a [`NetClient`] using the installed override.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Makes an additional plugin module loadable by identifier.
    pub fn with_module<F>(mut self, id: &str, register: F) -> Self
    where
        F: Fn(&ModuleContext<'_>, &mut PluginRegistry) -> Result<(), String> + Send + Sync + 'static,
    {
        self.modules.push((id.to_string(), Arc::new(register)));
        self
    }

    /// Runs all phases and returns the reports in declaration order.
    pub async fn check(&mut self) -> Result<&[Report<'a>], Error> {
        self.setup_dns();
        self.load_plugins()?;
        self.check_all().await;
        Ok(&self.reports)
    }

    pub fn setup_dns(&mut self) -> Arc<ResolverOverride> {
        self.resolver = Arc::new(ResolverOverride::install(&self.config.dns_map));
        self.resolver.clone()
    }

    pub fn load_plugins(&mut self) -> Result<(), LoadError> {
        let mut loader = PluginLoader::new(self.resolver.clone(), self.timeout);
        for (id, register) in &self.modules {
            let register = register.clone();
            loader.add_module(id, move |ctx, registry| register(ctx, registry));
        }

        let mut registry = PluginRegistry::new();
        loader.load_all(&self.config.plugins, &mut registry)?;
        if !registry.is_empty() {
            info!("Plugins available: {}", registry.names().join(", "));
        }
        self.registry = Arc::new(registry);
        Ok(())
    }

    /// Dispatches every check and appends the reports.
    pub async fn check_all(&mut self) {
        let config: &'a Config = self.config;
        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(NetClient::new(self.resolver.clone())) as Arc<dyn Transport>,
        };
        debug!(
            "Running {} check(s), {} at a time",
            config.checks.len(),
            self.jobs
        );

        let this = &*self;
        let reports: Vec<Report<'a>> = stream::iter(config.checks.iter())
            .map(|check| this.run_isolated(check, transport.as_ref()))
            .buffered(this.jobs)
            .collect()
            .await;

        for report in &reports {
            if !report.ok() {
                warn!("{} failed: {}", report.check().label(), report.msg());
            }
        }
        self.reports.extend(reports);
    }

    pub fn reports(&self) -> &[Report<'a>] {
        &self.reports
    }

    async fn run_isolated(&self, check: &'a CheckDescriptor, transport: &dyn Transport) -> Report<'a> {
        match AssertUnwindSafe(self.dispatch(check, transport))
            .catch_unwind()
            .await
        {
            Ok(report) => report,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Check {} panicked: {}", check.label(), message);
                Report::new(false, format!("check panicked: {}", message), check)
            }
        }
    }

    async fn dispatch(&self, check: &'a CheckDescriptor, transport: &dyn Transport) -> Report<'a> {
        if let Some(name) = &check.plugin_name {
            debug!("Dispatching {} to plugin {}", check.url, name);
            let plugin = match self.registry.lookup(name) {
                Ok(plugin) => plugin,
                Err(e) => {
                    error!("{}", e);
                    return Report::new(false, e.to_string(), check);
                }
            };
            return match plugin.check(&check.url, &check.args).await {
                Ok(()) => Report::new(true, plugin.name(), check),
                Err(reason) => Report::new(false, format!("{}: {}", plugin.name(), reason), check),
            };
        }

        match check.scheme().as_str() {
            "http" | "https" => http::check(transport, check, self.timeout).await,
            "ws" | "wss" => websocket::check(transport, check, self.timeout).await,
            _ => Report::new(false, INVALID_SCHEME_MSG, check),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
