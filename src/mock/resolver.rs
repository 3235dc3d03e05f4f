//! Static systems and apps lookup

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use jobflow_recovery::{AppUnavailableError, SystemUnavailableError};

use super::failure::{FailureConfig, FailureInjector, MockOp};
use crate::ports::{ResolveError, ResourceResolver};
use crate::resource::{App, ExecSystem};

#[derive(Debug, Default)]
struct ResolverState {
    systems: HashMap<(String, String), ExecSystem>,
    apps: HashMap<(String, String, String), App>,
    failures: FailureInjector,
}

/// Resolver over a fixed set of systems and apps.
///
/// A disabled system or app resolves to the matching unavailable signal.
#[derive(Debug, Default)]
pub struct StaticResolver {
    state: Mutex<ResolverState>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn add_system(&self, system: ExecSystem) {
        self.lock()
            .systems
            .insert((system.tenant.clone(), system.id.clone()), system);
    }

    pub fn add_app(&self, tenant: &str, app: App) {
        self.lock().apps.insert(
            (tenant.to_string(), app.id.clone(), app.version.clone()),
            app,
        );
    }

    pub fn set_system_enabled(&self, tenant: &str, system_id: &str, enabled: bool) {
        let key = (tenant.to_string(), system_id.to_string());
        if let Some(system) = self.lock().systems.get_mut(&key) {
            system.enabled = enabled;
        }
    }

    pub fn set_app_enabled(&self, tenant: &str, app_id: &str, version: &str, enabled: bool) {
        let key = (tenant.to_string(), app_id.to_string(), version.to_string());
        if let Some(app) = self.lock().apps.get_mut(&key) {
            app.enabled = enabled;
        }
    }

    pub fn inject(&self, op: MockOp, config: FailureConfig) {
        self.lock().failures.inject(op, config);
    }
}

impl ResourceResolver for StaticResolver {
    fn system(&self, tenant: &str, system_id: &str) -> Result<ExecSystem, ResolveError> {
        let mut state = self.lock();
        if let Some(failure) = state.failures.check(MockOp::ResolveSystem) {
            return Err(failure.resolve_error("system", system_id));
        }

        let system = state
            .systems
            .get(&(tenant.to_string(), system_id.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                kind: "system",
                id: system_id.to_string(),
            })?;

        if !system.enabled {
            return Err(SystemUnavailableError {
                tenant: tenant.to_string(),
                system_id: system.id.clone(),
                owner: system.owner.clone(),
                message: "system is disabled".to_string(),
            }
            .into());
        }
        Ok(system)
    }

    fn app(&self, tenant: &str, app_id: &str, version: &str) -> Result<App, ResolveError> {
        let mut state = self.lock();
        if let Some(failure) = state.failures.check(MockOp::ResolveApp) {
            return Err(failure.resolve_error("app", app_id));
        }

        let app = state
            .apps
            .get(&(tenant.to_string(), app_id.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| ResolveError::NotFound {
                kind: "app",
                id: format!("{}-{}", app_id, version),
            })?;

        if !app.enabled {
            return Err(AppUnavailableError {
                tenant: tenant.to_string(),
                app_id: app.id.clone(),
                app_version: app.version.clone(),
                owner: app.owner.clone(),
                message: "app is disabled".to_string(),
            }
            .into());
        }
        Ok(app)
    }
}
