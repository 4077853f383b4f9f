//! kcl_exec resource: runs the KCL tool once and records its output

use crate::exec::{self, ExecError, ExecRequest, DEFAULT_TIMEOUT};
use crate::KclProviderData;
use async_trait::async_trait;
use std::time::Duration;
use tfplug::context::Context;
use tfplug::plan_modifier::{RequiresReplaceIfChanged, UseStateForUnknown};
use tfplug::resource::{
    ConfigureResourceRequest, ConfigureResourceResponse, CreateResourceRequest,
    CreateResourceResponse, DeleteResourceRequest, DeleteResourceResponse, ReadResourceRequest,
    ReadResourceResponse, Resource, ResourceMetadataRequest, ResourceMetadataResponse,
    ResourceSchemaRequest, ResourceSchemaResponse, ResourceWithConfigure, UpdateResourceRequest,
    UpdateResourceResponse, ValidateResourceConfigRequest, ValidateResourceConfigResponse,
};
use tfplug::schema::{AttributeBuilder, AttributeType, SchemaBuilder};
use tfplug::types::{AttributePath, Diagnostic, Dynamic, DynamicValue};

#[derive(Default)]
pub struct KclExecResource {
    provider_data: KclProviderData,
}

impl KclExecResource {
    pub fn new() -> Self {
        Self::default()
    }

    fn exec_request(config: &DynamicValue) -> Result<ExecRequest, Diagnostic> {
        let source_dir = config
            .get_string(&AttributePath::new("source_dir"))
            .map_err(|e| invalid_attribute("source_dir", e))?;

        let mut request = ExecRequest::new(source_dir);
        request.args = config
            .get_string_list(&AttributePath::new("args"))
            .map_err(|e| invalid_attribute("args", e))?
            .unwrap_or_default();
        request.environment = config
            .get_string_map(&AttributePath::new("environment"))
            .map_err(|e| invalid_attribute("environment", e))?
            .unwrap_or_default();
        request.timeout = match config.get(&AttributePath::new("timeout")) {
            None | Some(Dynamic::Null) => DEFAULT_TIMEOUT,
            Some(value) => timeout_seconds(value)
                .map(Duration::from_secs)
                .ok_or_else(|| invalid_timeout(value))?,
        };

        Ok(request)
    }
}

fn timeout_seconds(value: &Dynamic) -> Option<u64> {
    let seconds = value.as_f64()?;
    if seconds >= 1.0 && seconds.fract() == 0.0 && seconds <= u64::MAX as f64 {
        Some(seconds as u64)
    } else {
        None
    }
}

fn invalid_timeout(value: &Dynamic) -> Diagnostic {
    Diagnostic::error(
        "Invalid timeout",
        format!(
            "timeout must be a positive whole number of seconds, got {}",
            value.to_json()
        ),
    )
    .with_attribute(AttributePath::new("timeout"))
}

fn invalid_attribute(name: &str, err: tfplug::TfplugError) -> Diagnostic {
    Diagnostic::error(format!("Invalid {}", name), err.to_string())
        .with_attribute(AttributePath::new(name))
}

fn exec_diagnostic(err: &ExecError) -> Diagnostic {
    let diagnostic = Diagnostic::error(err.summary(), err.to_string());
    match err {
        ExecError::PathResolution { .. }
        | ExecError::DirectoryNotFound { .. }
        | ExecError::NotADirectory { .. } => {
            diagnostic.with_attribute(AttributePath::new("source_dir"))
        }
        _ => diagnostic,
    }
}

#[async_trait]
impl Resource for KclExecResource {
    fn type_name(&self) -> &str {
        "kcl_exec"
    }

    async fn metadata(
        &self,
        _ctx: Context,
        _request: ResourceMetadataRequest,
    ) -> ResourceMetadataResponse {
        ResourceMetadataResponse {
            type_name: self.type_name().to_string(),
        }
    }

    async fn schema(
        &self,
        _ctx: Context,
        _request: ResourceSchemaRequest,
    ) -> ResourceSchemaResponse {
        let schema = SchemaBuilder::new()
            .version(0)
            .description("Runs the KCL tool in a source directory and records its output")
            .attribute(
                AttributeBuilder::new("id", AttributeType::String)
                    .description("Hash of the resolved invocation")
                    .computed()
                    .plan_modifier(Box::new(UseStateForUnknown))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("source_dir", AttributeType::String)
                    .description("Directory the tool runs in")
                    .required()
                    .plan_modifier(Box::new(RequiresReplaceIfChanged))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("output", AttributeType::String)
                    .description("Combined stdout and stderr of the run, trimmed")
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("args", AttributeType::List(Box::new(AttributeType::String)))
                    .description("Arguments passed to the tool")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new(
                    "triggers",
                    AttributeType::Map(Box::new(AttributeType::String)),
                )
                .description("Arbitrary values that force re-execution when changed")
                .optional()
                .plan_modifier(Box::new(RequiresReplaceIfChanged))
                .build(),
            )
            .attribute(
                AttributeBuilder::new("timeout", AttributeType::Number)
                    .description("Timeout in seconds, 300 when unset")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new(
                    "environment",
                    AttributeType::Map(Box::new(AttributeType::String)),
                )
                .description("Variables set on top of the provider's environment")
                .optional()
                .build(),
            )
            .build();

        ResourceSchemaResponse {
            schema,
            diagnostics: vec![],
        }
    }

    async fn validate(
        &self,
        _ctx: Context,
        request: ValidateResourceConfigRequest,
    ) -> ValidateResourceConfigResponse {
        let mut diagnostics = vec![];

        if let Some(Dynamic::String(source_dir)) =
            request.config.get(&AttributePath::new("source_dir"))
        {
            if source_dir.is_empty() {
                diagnostics.push(
                    Diagnostic::error("Invalid source_dir", "source_dir must not be empty")
                        .with_attribute(AttributePath::new("source_dir")),
                );
            }
        }

        // Unknown values are checked again at apply time
        match request.config.get(&AttributePath::new("timeout")) {
            None | Some(Dynamic::Null) | Some(Dynamic::Unknown) => {}
            Some(value) => {
                if timeout_seconds(value).is_none() {
                    diagnostics.push(invalid_timeout(value));
                }
            }
        }

        ValidateResourceConfigResponse { diagnostics }
    }

    async fn create(
        &self,
        ctx: Context,
        request: CreateResourceRequest,
    ) -> CreateResourceResponse {
        let exec_request = match Self::exec_request(&request.config) {
            Ok(exec_request) => exec_request,
            Err(diagnostic) => {
                return CreateResourceResponse {
                    new_state: DynamicValue::null(),
                    diagnostics: vec![diagnostic],
                }
            }
        };

        tracing::info!(
            source_dir = %exec_request.source_dir.display(),
            args = ?exec_request.args,
            "Executing KCL command"
        );

        let planner = self.provider_data.planner();
        let result = match exec::execute(&ctx, &planner, &exec_request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(error = %e, "kcl_exec create failed");
                return CreateResourceResponse {
                    new_state: DynamicValue::null(),
                    diagnostics: vec![exec_diagnostic(&e)],
                };
            }
        };

        let mut new_state = request.config;
        let mut diagnostics = vec![];
        for (name, value) in [("id", result.id), ("output", result.output)] {
            if let Err(e) = new_state.set_string(&AttributePath::new(name), value) {
                diagnostics.push(Diagnostic::error("Failed to record state", e.to_string()));
            }
        }

        CreateResourceResponse {
            new_state,
            diagnostics,
        }
    }

    async fn read(&self, _ctx: Context, request: ReadResourceRequest) -> ReadResourceResponse {
        ReadResourceResponse {
            new_state: Some(request.current_state),
            diagnostics: vec![],
        }
    }

    async fn update(
        &self,
        _ctx: Context,
        request: UpdateResourceRequest,
    ) -> UpdateResourceResponse {
        let err = ExecError::UnsupportedOperation;
        UpdateResourceResponse {
            new_state: request.prior_state,
            diagnostics: vec![Diagnostic::error(err.summary(), err.to_string())],
        }
    }

    async fn delete(
        &self,
        _ctx: Context,
        _request: DeleteResourceRequest,
    ) -> DeleteResourceResponse {
        // Nothing outside the state was created
        DeleteResourceResponse {
            diagnostics: vec![],
        }
    }
}

#[async_trait]
impl ResourceWithConfigure for KclExecResource {
    async fn configure(
        &mut self,
        _ctx: Context,
        request: ConfigureResourceRequest,
    ) -> ConfigureResourceResponse {
        let mut diagnostics = vec![];

        if let Some(data) = request.provider_data {
            if let Some(provider_data) = data.downcast_ref::<KclProviderData>() {
                self.provider_data = provider_data.clone();
            } else {
                diagnostics.push(Diagnostic::error(
                    "Invalid provider data",
                    "Failed to extract KclProviderData from provider data",
                ));
            }
        }

        ConfigureResourceResponse { diagnostics }
    }
}
