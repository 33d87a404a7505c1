use async_trait::async_trait;

use crate::error::LlmError;

/// A single prompt for a generative model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    /// System instruction, sent separately from the user turn
    pub system: Option<String>,
    pub prompt: String,
    /// Ask the model for a JSON document instead of free text
    pub json_output: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        GenerationRequest {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

/// Generates text completions
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;
}
