//! Transport-independent provider server
//!
//! `ProviderServer` performs the host side of the resource lifecycle: it
//! configures the provider, instantiates configured resources from the
//! provider's factories, checks configurations against their schemas,
//! computes plans (unknown computed values, plan modifiers, requires-replace)
//! and dispatches applies to create, update and delete. A wire transport, a
//! CLI or a test harness can drive it directly.

use crate::context::Context;
use crate::error::{Result, TfplugError};
use crate::plan_modifier::{values_equal, PlanModifyRequest};
use crate::provider::{
    ConfigureProviderRequest, Provider, ProviderMetadataRequest, ProviderSchemaRequest,
    ValidateProviderConfigRequest,
};
use crate::resource::{
    ConfigureResourceRequest, CreateResourceRequest, DeleteResourceRequest, ReadResourceRequest,
    ResourceMetadataRequest, ResourceSchemaRequest, ResourceWithConfigure, UpdateResourceRequest,
    ValidateResourceConfigRequest,
};
use crate::types::{AttributePath, Diagnostic, DiagnosticsExt, Dynamic, DynamicValue};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What applying a plan will do to the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    NoOp,
    Create,
    Update,
    Replace,
    Delete,
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlannedAction::NoOp => "no-op",
            PlannedAction::Create => "create",
            PlannedAction::Update => "update",
            PlannedAction::Replace => "replace",
            PlannedAction::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub action: PlannedAction,
    pub planned_state: DynamicValue,
    pub requires_replace: Vec<AttributePath>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Result of an apply; a null `new_state` means the resource is absent
#[derive(Debug, Clone)]
pub struct Applied {
    pub new_state: DynamicValue,
    pub diagnostics: Vec<Diagnostic>,
}

type ProviderData = Option<Arc<dyn Any + Send + Sync>>;

pub struct ProviderServer<P: Provider> {
    provider: RwLock<P>,
    provider_data: RwLock<Option<ProviderData>>,
    ctx: Context,
}

impl<P: Provider> ProviderServer<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider: RwLock::new(provider),
            provider_data: RwLock::new(None),
            ctx: Context::new(),
        }
    }

    /// Root context handed to every operation
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Cancel in-flight and future operations
    pub fn stop(&self) {
        tracing::info!("stopping provider server");
        self.ctx.cancel();
    }

    /// Validate and configure the provider
    /// Resources can only be used once this returned no errors
    pub async fn configure(&self, config: DynamicValue) -> Vec<Diagnostic> {
        let mut provider = self.provider.write().await;

        let schema_response = provider
            .schema(self.ctx.clone(), ProviderSchemaRequest)
            .await;
        let mut diagnostics = schema_response.diagnostics;
        // A null provider block means nothing was set
        if !config.is_null() {
            diagnostics.extend(schema_response.schema.validate_config(&config));
        }
        if diagnostics.has_errors() {
            return diagnostics;
        }

        diagnostics.extend(
            provider
                .validate(
                    self.ctx.clone(),
                    ValidateProviderConfigRequest {
                        config: config.clone(),
                    },
                )
                .await
                .diagnostics,
        );
        if diagnostics.has_errors() {
            return diagnostics;
        }

        let response = provider
            .configure(self.ctx.clone(), ConfigureProviderRequest { config })
            .await;
        diagnostics.extend(response.diagnostics);

        if !diagnostics.has_errors() {
            *self.provider_data.write().await = Some(response.provider_data);
            let metadata = provider
                .metadata(self.ctx.clone(), ProviderMetadataRequest)
                .await;
            tracing::debug!(
                provider = %metadata.type_name,
                version = %metadata.version,
                "provider configured"
            );
        }

        diagnostics
    }

    pub async fn plan(
        &self,
        type_name: &str,
        prior_state: &DynamicValue,
        config: &DynamicValue,
    ) -> Result<Plan> {
        let resource = self.resource(type_name).await?;

        if config.is_null() {
            let action = if prior_state.is_null() {
                PlannedAction::NoOp
            } else {
                PlannedAction::Delete
            };
            return Ok(Plan {
                action,
                planned_state: DynamicValue::null(),
                requires_replace: vec![],
                diagnostics: vec![],
            });
        }

        let schema_response = resource
            .schema(self.ctx.clone(), ResourceSchemaRequest)
            .await;
        let schema = schema_response.schema;
        let mut diagnostics = schema_response.diagnostics;
        diagnostics.extend(schema.validate_config(config));

        // Resource checks only see configs that match the schema
        if !diagnostics.has_errors() {
            diagnostics.extend(
                resource
                    .validate(
                        self.ctx.clone(),
                        ValidateResourceConfigRequest {
                            type_name: type_name.to_string(),
                            config: config.clone(),
                        },
                    )
                    .await
                    .diagnostics,
            );
        }
        if diagnostics.has_errors() {
            return Ok(Plan {
                action: PlannedAction::NoOp,
                planned_state: prior_state.clone(),
                requires_replace: vec![],
                diagnostics,
            });
        }

        let mut planned_state = config.clone();
        for attr in schema.computed_only() {
            planned_state.mark_unknown(&AttributePath::new(&attr.name))?;
        }

        let mut requires_replace = Vec::new();
        for attr in schema.attributes.iter() {
            if attr.plan_modifiers.is_empty() {
                continue;
            }

            let path = AttributePath::new(&attr.name);
            let state_value = lookup(prior_state, &path);
            let config_value = lookup(config, &path);
            let mut plan_value = lookup(&planned_state, &path);

            for modifier in &attr.plan_modifiers {
                let response = modifier.modify_plan(PlanModifyRequest {
                    state: state_value.clone(),
                    plan: plan_value,
                    config: config_value.clone(),
                    attribute_path: attr.name.clone(),
                });

                plan_value = response.plan_value;
                diagnostics.extend(response.diagnostics);

                // Replacement only means something for an existing resource
                if response.requires_replace
                    && !prior_state.is_null()
                    && !requires_replace.contains(&path)
                {
                    tracing::debug!(
                        resource = type_name,
                        attribute = %path,
                        reason = %modifier.description(),
                        "attribute forces replacement"
                    );
                    requires_replace.push(path.clone());
                }
            }

            planned_state.set_value(&path, plan_value)?;
        }

        let action = if prior_state.is_null() {
            PlannedAction::Create
        } else if !requires_replace.is_empty() {
            // A replacement produces a new object, so nothing computed survives
            for attr in schema.computed_only() {
                planned_state.mark_unknown(&AttributePath::new(&attr.name))?;
            }
            PlannedAction::Replace
        } else {
            let changed = schema
                .attributes
                .iter()
                .filter(|attr| attr.required || attr.optional)
                .any(|attr| {
                    let path = AttributePath::new(&attr.name);
                    !values_equal(&lookup(&planned_state, &path), &lookup(prior_state, &path))
                });
            if changed {
                PlannedAction::Update
            } else {
                planned_state = prior_state.clone();
                PlannedAction::NoOp
            }
        };

        let replaced: Vec<String> = requires_replace.iter().map(ToString::to_string).collect();
        tracing::debug!(
            resource = type_name,
            action = %action,
            requires_replace = ?replaced,
            "planned resource change"
        );

        Ok(Plan {
            action,
            planned_state,
            requires_replace,
            diagnostics,
        })
    }

    pub async fn apply(
        &self,
        type_name: &str,
        prior_state: &DynamicValue,
        plan: &Plan,
        config: &DynamicValue,
    ) -> Result<Applied> {
        if plan.diagnostics.has_errors() {
            return Err(TfplugError::InvalidConfiguration(format!(
                "refusing to apply a plan for {} that has errors",
                type_name
            )));
        }

        if plan.action != PlannedAction::Delete && config.value.contains_unknown() {
            return Err(TfplugError::InvalidConfiguration(format!(
                "configuration for {} still has unknown values at apply time",
                type_name
            )));
        }

        let resource = self.resource(type_name).await?;

        let applied = match plan.action {
            PlannedAction::NoOp => Applied {
                new_state: prior_state.clone(),
                diagnostics: vec![],
            },
            PlannedAction::Create => {
                self.create(resource.as_ref(), type_name, plan, config)
                    .await
            }
            PlannedAction::Delete => {
                self.delete(resource.as_ref(), type_name, prior_state)
                    .await
            }
            PlannedAction::Update => {
                let response = resource
                    .update(
                        self.ctx.clone(),
                        UpdateResourceRequest {
                            type_name: type_name.to_string(),
                            prior_state: prior_state.clone(),
                            planned_state: plan.planned_state.clone(),
                            config: config.clone(),
                        },
                    )
                    .await;
                // A failed update leaves the prior state in place
                let new_state = if response.diagnostics.has_errors() {
                    prior_state.clone()
                } else {
                    response.new_state
                };
                Applied {
                    new_state,
                    diagnostics: response.diagnostics,
                }
            }
            PlannedAction::Replace => {
                let deleted = self
                    .delete(resource.as_ref(), type_name, prior_state)
                    .await;
                if deleted.diagnostics.has_errors() {
                    return Ok(deleted);
                }
                let mut created = self
                    .create(resource.as_ref(), type_name, plan, config)
                    .await;
                let mut diagnostics = deleted.diagnostics;
                diagnostics.append(&mut created.diagnostics);
                Applied {
                    new_state: created.new_state,
                    diagnostics,
                }
            }
        };

        Ok(applied)
    }

    /// Refresh state through the resource's read
    pub async fn read(&self, type_name: &str, state: &DynamicValue) -> Result<Applied> {
        let resource = self.resource(type_name).await?;
        let response = resource
            .read(
                self.ctx.clone(),
                ReadResourceRequest {
                    type_name: type_name.to_string(),
                    current_state: state.clone(),
                },
            )
            .await;

        Ok(Applied {
            new_state: response.new_state.unwrap_or_else(DynamicValue::null),
            diagnostics: response.diagnostics,
        })
    }

    async fn create(
        &self,
        resource: &dyn ResourceWithConfigure,
        type_name: &str,
        plan: &Plan,
        config: &DynamicValue,
    ) -> Applied {
        let response = resource
            .create(
                self.ctx.clone(),
                CreateResourceRequest {
                    type_name: type_name.to_string(),
                    planned_state: plan.planned_state.clone(),
                    config: config.clone(),
                },
            )
            .await;

        // A failed create persists nothing
        let new_state = if response.diagnostics.has_errors() {
            tracing::debug!(resource = type_name, "create failed, no state recorded");
            DynamicValue::null()
        } else {
            response.new_state
        };

        Applied {
            new_state,
            diagnostics: response.diagnostics,
        }
    }

    async fn delete(
        &self,
        resource: &dyn ResourceWithConfigure,
        type_name: &str,
        prior_state: &DynamicValue,
    ) -> Applied {
        let response = resource
            .delete(
                self.ctx.clone(),
                DeleteResourceRequest {
                    type_name: type_name.to_string(),
                    prior_state: prior_state.clone(),
                },
            )
            .await;

        let new_state = if response.diagnostics.has_errors() {
            prior_state.clone()
        } else {
            DynamicValue::null()
        };

        Applied {
            new_state,
            diagnostics: response.diagnostics,
        }
    }

    /// Fresh resource instance configured with the provider data
    async fn resource(&self, type_name: &str) -> Result<Box<dyn ResourceWithConfigure>> {
        let provider_data = self
            .provider_data
            .read()
            .await
            .clone()
            .ok_or(TfplugError::ProviderNotConfigured)?;

        let mut resource = {
            let provider = self.provider.read().await;
            let factories = provider.resources();
            let factory = factories
                .get(type_name)
                .ok_or_else(|| TfplugError::ResourceNotFound(type_name.to_string()))?;
            tracing::trace!(provider = provider.type_name(), resource = type_name, "new resource");
            factory()
        };

        let response = resource
            .configure(self.ctx.clone(), ConfigureResourceRequest { provider_data })
            .await;
        if response.diagnostics.has_errors() {
            let messages: Vec<String> = response
                .diagnostics
                .iter()
                .map(ToString::to_string)
                .collect();
            return Err(TfplugError::InvalidConfiguration(messages.join("; ")));
        }

        let metadata = resource
            .metadata(self.ctx.clone(), ResourceMetadataRequest)
            .await;
        if metadata.type_name != type_name {
            return Err(TfplugError::InvalidConfiguration(format!(
                "resource registered as {} reports type {}",
                type_name, metadata.type_name
            )));
        }

        Ok(resource)
    }
}

fn lookup(value: &DynamicValue, path: &AttributePath) -> Dynamic {
    value.get(path).cloned().unwrap_or(Dynamic::Null)
}
