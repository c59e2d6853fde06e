//! Terraform configuration.
//!
//! `resource` blocks with a recognised type become data-store, queue,
//! gateway or service components; `module` blocks become infrastructure
//! components. Variables, outputs and unrecognised resources yield nothing.

use crate::recovery::model::{Component, ComponentType};
use crate::recovery::parsers::detect_technology;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use hcl::{Block, Body, Expression};

/// Resource type → component type. Entries ending in `_` match as prefixes.
const RESOURCE_TYPES: &[(&str, ComponentType)] = &[
    ("aws_db_instance", ComponentType::Database),
    ("aws_rds_cluster", ComponentType::Database),
    ("aws_dynamodb_table", ComponentType::Database),
    ("google_sql_database_instance", ComponentType::Database),
    ("azurerm_postgresql_", ComponentType::Database),
    ("azurerm_mysql_", ComponentType::Database),
    ("azurerm_cosmosdb_", ComponentType::Database),
    ("aws_elasticache_cluster", ComponentType::Cache),
    ("aws_elasticache_replication_group", ComponentType::Cache),
    ("google_redis_instance", ComponentType::Cache),
    ("azurerm_redis_cache", ComponentType::Cache),
    ("aws_sqs_queue", ComponentType::Queue),
    ("aws_sns_topic", ComponentType::Queue),
    ("aws_msk_cluster", ComponentType::Queue),
    ("aws_kinesis_stream", ComponentType::Queue),
    ("aws_mq_broker", ComponentType::Queue),
    ("google_pubsub_topic", ComponentType::Queue),
    ("azurerm_servicebus_queue", ComponentType::Queue),
    ("aws_s3_bucket", ComponentType::Storage),
    ("aws_efs_file_system", ComponentType::Storage),
    ("google_storage_bucket", ComponentType::Storage),
    ("azurerm_storage_account", ComponentType::Storage),
    ("aws_api_gateway_rest_api", ComponentType::ApiGateway),
    ("aws_apigatewayv2_api", ComponentType::ApiGateway),
    ("aws_lb", ComponentType::ApiGateway),
    ("aws_alb", ComponentType::ApiGateway),
    ("aws_ecs_service", ComponentType::Service),
    ("aws_lambda_function", ComponentType::Service),
    ("aws_instance", ComponentType::Service),
    ("google_cloud_run_service", ComponentType::Service),
    ("google_cloudfunctions_function", ComponentType::Service),
    ("azurerm_linux_web_app", ComponentType::Service),
    ("kubernetes_deployment", ComponentType::Service),
];

/// A `resource "<type>" "<name>"` block.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub resource_type: String,
    pub name: String,
    /// `engine` attribute (databases, caches), if a literal string.
    pub engine: Option<String>,
}

/// A `module "<name>"` block.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerraformFile {
    pub resources: Vec<Resource>,
    pub modules: Vec<Module>,
}

impl TerraformFile {
    pub fn parse(text: &str) -> ArchlensResult<Self> {
        let body: Body =
            hcl::parse(text).map_err(|e| ArchlensError::Parse(format!("invalid HCL: {}", e)))?;

        let mut file = Self::default();
        for block in body.blocks() {
            match (block.identifier(), block.labels()) {
                ("resource", [resource_type, name, ..]) => file.resources.push(Resource {
                    resource_type: resource_type.as_str().to_string(),
                    name: name.as_str().to_string(),
                    engine: string_attribute(block, "engine"),
                }),
                ("module", [name, ..]) => file.modules.push(Module {
                    name: name.as_str().to_string(),
                    source: string_attribute(block, "source"),
                }),
                _ => {}
            }
        }
        Ok(file)
    }

    pub fn components(&self, source: &str) -> Vec<Component> {
        let resources = self.resources.iter().filter_map(|r| {
            let component_type = type_for_resource(&r.resource_type)?;
            Some(
                Component::new(&r.name, component_type, r.technology())
                    .with_metadata("kind", "terraform_resource")
                    .with_metadata("resource_type", r.resource_type.as_str())
                    .with_metadata("file", source),
            )
        });
        let modules = self.modules.iter().map(|m| {
            let mut component = Component::new(&m.name, ComponentType::Infrastructure, "terraform")
                .with_metadata("kind", "terraform_module")
                .with_metadata("file", source);
            if let Some(module_source) = &m.source {
                component = component.with_metadata("module_source", module_source.as_str());
            }
            component
        });
        resources.chain(modules).collect()
    }
}

impl Resource {
    /// Engine technology when declared, otherwise the provider (`aws`, `google`).
    fn technology(&self) -> String {
        if let Some(engine) = &self.engine {
            let detected = detect_technology(engine);
            return if detected == "unknown" {
                engine.clone()
            } else {
                detected.to_string()
            };
        }
        self.resource_type
            .split('_')
            .next()
            .unwrap_or("terraform")
            .to_string()
    }
}

fn type_for_resource(resource_type: &str) -> Option<ComponentType> {
    RESOURCE_TYPES
        .iter()
        .find(|(key, _)| {
            if key.ends_with('_') {
                resource_type.starts_with(key)
            } else {
                resource_type == *key
            }
        })
        .map(|(_, t)| *t)
}

fn string_attribute(block: &Block, key: &str) -> Option<String> {
    block
        .body()
        .attributes()
        .find(|a| a.key() == key)
        .and_then(|a| match a.expr() {
            Expression::String(s) => Some(s.clone()),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIN_TF: &str = r#"
variable "region" {
  default = "eu-west-1"
}

resource "aws_db_instance" "orders" {
  engine         = "postgres"
  instance_class = "db.t3.micro"
}

resource "aws_elasticache_cluster" "sessions" {
  engine = "redis"
}

resource "aws_s3_bucket" "assets" {}

resource "aws_s3_bucket_policy" "assets" {
  bucket = "assets"
}

resource "aws_iam_role" "deploy" {
  name = "deploy"
}

module "network" {
  source = "terraform-aws-modules/vpc/aws"
  cidr   = "10.0.0.0/16"
}
"#;

    #[test]
    fn test_parse_resources_and_modules() {
        let file = TerraformFile::parse(MAIN_TF).unwrap();
        assert_eq!(file.resources.len(), 5);
        assert_eq!(file.resources[0].resource_type, "aws_db_instance");
        assert_eq!(file.resources[0].engine.as_deref(), Some("postgres"));
        assert_eq!(
            file.modules,
            vec![Module {
                name: "network".into(),
                source: Some("terraform-aws-modules/vpc/aws".into()),
            }]
        );
    }

    #[test]
    fn test_components() {
        let file = TerraformFile::parse(MAIN_TF).unwrap();
        let components = file.components("infra/main.tf");
        let summary: Vec<_> = components
            .iter()
            .map(|c| (c.name.as_str(), c.component_type, c.technology.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("orders", ComponentType::Database, "postgresql"),
                ("sessions", ComponentType::Cache, "redis"),
                ("assets", ComponentType::Storage, "aws"),
                ("network", ComponentType::Infrastructure, "terraform"),
            ]
        );
        assert_eq!(components[0].metadata["resource_type"], "aws_db_instance");
        assert_eq!(components[3].metadata["module_source"], "terraform-aws-modules/vpc/aws");
    }

    #[test]
    fn test_invalid_hcl_is_parse_error() {
        let err = TerraformFile::parse("resource \"aws_s3_bucket\" {").unwrap_err();
        assert!(matches!(err, ArchlensError::Parse(_)));
    }
}
