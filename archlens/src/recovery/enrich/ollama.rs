//! Enrichment through a local Ollama server.
//!
//! `POST {base_url}/api/generate` with `format: "json"`. Any transport,
//! status or decoding failure falls back to [`HeuristicEnricher`].

use super::{Enricher, HeuristicEnricher};
use crate::recovery::model::{Component, Relationship, RelationshipContext, SemanticContext};
use crate::runtime::options::LlmOptions;
use archlens_shared::errors::{ArchlensError, ArchlensResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct ComponentAnswer {
    #[serde(default)]
    purpose: String,
    #[serde(default)]
    business_capability: String,
    #[serde(default)]
    responsibilities: Vec<String>,
}

pub struct OllamaEnricher {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaEnricher {
    pub fn new(options: &LlmOptions) -> ArchlensResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| ArchlensError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", options.base_url.trim_end_matches('/')),
            model: options.model.clone(),
        })
    }

    async fn generate(&self, prompt: String) -> ArchlensResult<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                format: "json",
            })
            .send()
            .await
            .map_err(|e| ArchlensError::Process(format!("LLM request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ArchlensError::Process(format!(
                "LLM returned {}: {}",
                status, body
            )));
        }
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ArchlensError::Parse(format!("invalid LLM response: {}", e)))?;
        Ok(body.response)
    }

    async fn ask_component(&self, component: &Component) -> ArchlensResult<SemanticContext> {
        let answer = self.generate(component_prompt(component)?).await?;
        let parsed: ComponentAnswer = serde_json::from_str(&answer)?;
        Ok(SemanticContext {
            purpose: parsed.purpose,
            business_capability: parsed.business_capability,
            responsibilities: parsed.responsibilities,
            technology_stack: vec![component.technology.clone()],
        })
    }

    async fn ask_relationship(&self, relationship: &Relationship) -> ArchlensResult<RelationshipContext> {
        let answer = self.generate(relationship_prompt(relationship)).await?;
        Ok(serde_json::from_str(&answer)?)
    }
}

#[async_trait]
impl Enricher for OllamaEnricher {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn enrich_component(&self, component: &Component) -> ArchlensResult<SemanticContext> {
        match self.ask_component(component).await {
            Ok(context) => Ok(context),
            Err(e) => {
                tracing::warn!(component = %component.name, error = %e, "LLM enrichment failed, using heuristics");
                Ok(HeuristicEnricher::component_context(component))
            }
        }
    }

    async fn enrich_relationship(
        &self,
        relationship: &Relationship,
    ) -> ArchlensResult<RelationshipContext> {
        match self.ask_relationship(relationship).await {
            Ok(context) => Ok(context),
            Err(e) => {
                tracing::warn!(
                    source = %relationship.source,
                    target = %relationship.target,
                    error = %e,
                    "LLM enrichment failed, using heuristics"
                );
                Ok(HeuristicEnricher::relationship_context(relationship))
            }
        }
    }
}

fn component_prompt(component: &Component) -> ArchlensResult<String> {
    let metadata = serde_json::to_string_pretty(&component.metadata)?;
    Ok(format!(
        r#"Analyze the following software component and provide semantic information:

Component Information:
Name: {name}
Type: {kind}
Technology: {technology}
Ports: {ports:?}
Metadata: {metadata}

Respond in JSON format:
{{
    "purpose": "...",
    "business_capability": "...",
    "responsibilities": ["...", "..."],
    "c4_level": "container|component|code",
    "component_type": "service|database|queue|cache|frontend|..."
}}"#,
        name = component.name,
        kind = component.component_type,
        technology = component.technology,
        ports = component.exposed_ports,
    ))
}

fn relationship_prompt(relationship: &Relationship) -> String {
    format!(
        r#"Analyze the relationship between two components:

Source Component: {source}
Target Component: {target}
Interaction Details:
Type: {kind}
Protocol: {protocol}
Description: {description}

Respond in JSON format:
{{
    "relationship_type": "sync|async",
    "protocol": "http|grpc|messaging|database|...",
    "purpose": "...",
    "direction": "unidirectional|bidirectional"
}}"#,
        source = relationship.source,
        target = relationship.target,
        kind = relationship.kind.as_str(),
        protocol = relationship.protocol,
        description = relationship.description,
    )
}
