//! Terraform-style provider that runs the KCL compiler
//!
//! The provider exposes one resource, `kcl_exec`. Creating it runs `kcl` once
//! in a source directory and records a hash of the invocation together with
//! the tool's output. Any change to the inputs replaces the resource.

pub mod exec;
pub mod provider_data;
pub mod resources;

pub use provider_data::KclProviderData;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tfplug::context::Context;
use tfplug::provider::{
    ConfigureProviderRequest, ConfigureProviderResponse, Provider, ProviderMetadataRequest,
    ProviderMetadataResponse, ProviderSchemaRequest, ProviderSchemaResponse, ResourceFactory,
    ValidateProviderConfigRequest, ValidateProviderConfigResponse,
};
use tfplug::resource::ResourceWithConfigure;
use tfplug::schema::{AttributeBuilder, AttributeType, SchemaBuilder};
use tfplug::types::{AttributePath, Diagnostic, Dynamic};

pub const KCL_PATH_ENV: &str = "KCL_PATH";

#[derive(Debug, Default)]
pub struct KclProvider;

impl KclProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Provider for KclProvider {
    fn type_name(&self) -> &str {
        "kcl"
    }

    async fn metadata(
        &self,
        _ctx: Context,
        _request: ProviderMetadataRequest,
    ) -> ProviderMetadataResponse {
        ProviderMetadataResponse {
            type_name: "kcl".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    async fn schema(
        &self,
        _ctx: Context,
        _request: ProviderSchemaRequest,
    ) -> ProviderSchemaResponse {
        let schema = SchemaBuilder::new()
            .version(0)
            .description("Runs the KCL configuration language tool")
            .attribute(
                AttributeBuilder::new("kcl_path", AttributeType::String)
                    .description("Path to the kcl executable (defaults to KCL_PATH, then kcl on PATH)")
                    .optional()
                    .build(),
            )
            .build();

        ProviderSchemaResponse {
            schema,
            diagnostics: vec![],
        }
    }

    async fn validate(
        &self,
        _ctx: Context,
        request: ValidateProviderConfigRequest,
    ) -> ValidateProviderConfigResponse {
        let mut diagnostics = vec![];

        if let Some(Dynamic::String(path)) = request.config.get(&AttributePath::new("kcl_path")) {
            if path.is_empty() {
                diagnostics.push(
                    Diagnostic::warning(
                        "Empty kcl_path",
                        format!("kcl_path is empty, falling back to {} or kcl on PATH", KCL_PATH_ENV),
                    )
                    .with_attribute(AttributePath::new("kcl_path")),
                );
            }
        }

        ValidateProviderConfigResponse { diagnostics }
    }

    async fn configure(
        &mut self,
        _ctx: Context,
        request: ConfigureProviderRequest,
    ) -> ConfigureProviderResponse {
        let kcl_path = request
            .config
            .get_string(&AttributePath::new("kcl_path"))
            .ok()
            .filter(|path| !path.is_empty())
            .or_else(|| {
                std::env::var(KCL_PATH_ENV)
                    .ok()
                    .filter(|path| !path.is_empty())
            });

        tracing::debug!(kcl_path = ?kcl_path, "configured kcl provider");

        ConfigureProviderResponse {
            diagnostics: vec![],
            provider_data: Some(Arc::new(KclProviderData::new(kcl_path))),
        }
    }

    fn resources(&self) -> HashMap<String, ResourceFactory> {
        let mut factories: HashMap<String, ResourceFactory> = HashMap::new();
        factories.insert(
            "kcl_exec".to_string(),
            Box::new(|| {
                Box::new(resources::KclExecResource::new()) as Box<dyn ResourceWithConfigure>
            }),
        );
        factories
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tfplug::resource::Resource;
    use tfplug::types::DynamicValue;
    use tfplug::ProviderServer;

    async fn configure(config: DynamicValue) -> ConfigureProviderResponse {
        KclProvider::new()
            .configure(Context::new(), ConfigureProviderRequest { config })
            .await
    }

    fn provider_data_of(response: &ConfigureProviderResponse) -> KclProviderData {
        response
            .provider_data
            .as_ref()
            .and_then(|data| data.downcast_ref::<KclProviderData>())
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    #[serial]
    async fn kcl_path_from_config_wins_over_env() {
        std::env::set_var(KCL_PATH_ENV, "/from/env/kcl");
        let mut config = DynamicValue::object();
        config
            .set_string(&AttributePath::new("kcl_path"), "/from/config/kcl")
            .unwrap();

        let response = configure(config).await;

        assert!(response.diagnostics.is_empty());
        assert_eq!(
            provider_data_of(&response).planner().command(),
            "/from/config/kcl"
        );

        std::env::remove_var(KCL_PATH_ENV);
    }

    #[tokio::test]
    #[serial]
    async fn kcl_path_falls_back_to_env() {
        std::env::set_var(KCL_PATH_ENV, "/from/env/kcl");

        let response = configure(DynamicValue::object()).await;

        assert_eq!(
            provider_data_of(&response).kcl_path.as_deref(),
            Some("/from/env/kcl")
        );

        std::env::remove_var(KCL_PATH_ENV);
    }

    #[tokio::test]
    #[serial]
    async fn kcl_path_defaults_to_kcl_on_path() {
        std::env::remove_var(KCL_PATH_ENV);

        let response = configure(DynamicValue::null()).await;

        assert!(response.diagnostics.is_empty());
        let data = provider_data_of(&response);
        assert_eq!(data.kcl_path, None);
        assert_eq!(data.planner().command(), "kcl");
    }

    #[tokio::test]
    async fn empty_kcl_path_is_a_warning() {
        let mut config = DynamicValue::object();
        config
            .set_string(&AttributePath::new("kcl_path"), "")
            .unwrap();

        let response = KclProvider::new()
            .validate(Context::new(), ValidateProviderConfigRequest { config })
            .await;

        assert_eq!(response.diagnostics.len(), 1);
        assert!(!response.diagnostics[0].is_error());
    }

    #[tokio::test]
    async fn server_rejects_non_string_kcl_path() {
        let server = ProviderServer::new(KclProvider::new());
        let mut config = DynamicValue::object();
        config
            .set_number(&AttributePath::new("kcl_path"), 3.0)
            .unwrap();

        let diagnostics = server.configure(config).await;

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "Type mismatch for field: kcl_path");
    }

    #[test]
    fn provider_serves_only_kcl_exec() {
        let resources = KclProvider::new().resources();

        assert_eq!(resources.len(), 1);
        let resource = resources["kcl_exec"]();
        assert_eq!(resource.type_name(), "kcl_exec");
    }
}
