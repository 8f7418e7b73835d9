use std::path::PathBuf;

/// Server settings, read from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    /// File-backed run store root. Runs are kept in memory when unset.
    pub state_dir: Option<PathBuf>,
    pub model_base_url: String,
    pub model_api_key: Option<String>,
    pub model_name: String,
    pub system_prompt: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        Self {
            bind_address: var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            state_dir: var("STATE_DIR").map(PathBuf::from),
            model_base_url: var("MODEL_BASE_URL")
                .unwrap_or_else(|| "https://ai-gateway.vercel.sh/v1".to_string()),
            model_api_key: var("MODEL_API_KEY"),
            model_name: var("MODEL_NAME").unwrap_or_else(|| "xai/grok-2-vision-1212".to_string()),
            system_prompt: var("SYSTEM_PROMPT"),
        }
    }
}
