//! Plugin harness over the in-memory store and deterministic embedder.

use std::sync::Arc;
use std::time::Duration;

use reprise::{
    ChatMessage, EmbeddingConfig, GatewayPlugin, GenerationClient, GenerationParams,
    GenerationRequest, GenerationResponse, MemoryVectorStore, MessageContent, MockGenerationClient,
    PluginConfig, PreHookOutcome, RequestContext, RequestInput, RequestOptions, ResponseExtra,
    Role, SemanticCachePlugin, Usage, VectorStore,
};

pub const EMBEDDING_DIM: usize = 256;

/// Knobs the suites vary; everything else uses plugin defaults.
#[derive(Debug, Clone)]
pub struct TestPluginConfig {
    pub threshold: f32,
    pub ttl: Duration,
    pub exclude_system_prompt: bool,
    pub conversation_history_threshold: usize,
    pub cache_by_model: bool,
    pub with_embedder: bool,
}

impl Default for TestPluginConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            ttl: Duration::from_secs(300),
            exclude_system_prompt: false,
            conversation_history_threshold: 3,
            cache_by_model: true,
            with_embedder: true,
        }
    }
}

pub struct TestHarness {
    pub plugin: SemanticCachePlugin,
    pub store: Arc<MemoryVectorStore>,
    pub client: Arc<MockGenerationClient>,
}

/// Installs a test-writer subscriber once so `RUST_LOG` surfaces plugin
/// traces during test runs.
fn init_tracing() {
    static TRACING: std::sync::Once = std::sync::Once::new();
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub async fn spawn_test_plugin(config: TestPluginConfig) -> TestHarness {
    init_tracing();

    let store = Arc::new(MemoryVectorStore::new());
    let client = Arc::new(MockGenerationClient::new(EMBEDDING_DIM));

    let plugin_config = PluginConfig {
        embedding: Some(EmbeddingConfig {
            provider: "emb-provider".to_string(),
            keys: vec!["emb-key".to_string()],
            embedding_model: "emb-model".to_string(),
            dimension: EMBEDDING_DIM,
        }),
        ttl: config.ttl,
        threshold: config.threshold,
        exclude_system_prompt: config.exclude_system_prompt,
        conversation_history_threshold: config.conversation_history_threshold,
        cache_by_model: config.cache_by_model,
        ..Default::default()
    };

    let store_handle: Arc<dyn VectorStore> = store.clone();
    let generation: Option<Arc<dyn GenerationClient>> = if config.with_embedder {
        Some(client.clone())
    } else {
        None
    };

    let plugin = SemanticCachePlugin::init(plugin_config, store_handle, generation)
        .await
        .expect("plugin init against the mock store succeeds");

    TestHarness {
        plugin,
        store,
        client,
    }
}

impl TestHarness {
    /// Drives one request through both hooks expecting a miss, lets the
    /// write settle, and returns what the caller would have received.
    pub async fn run_miss(
        &self,
        options: RequestOptions,
        request: GenerationRequest,
        response: GenerationResponse,
    ) -> GenerationResponse {
        let mut ctx = RequestContext::new(options);
        let outcome = self
            .plugin
            .pre_hook(&mut ctx, request)
            .await
            .expect("pre hook never errors");
        assert!(
            matches!(outcome, PreHookOutcome::Forward(_)),
            "expected a cache miss"
        );

        let returned = self
            .plugin
            .post_hook(&ctx, Ok(response))
            .await
            .expect("post hook passes responses through");
        self.plugin.settle_writes().await;
        returned
    }
}

/// Builder-style extras for test requests.
pub trait RequestExt {
    fn with_system(self, text: &str) -> Self;
    fn with_tools(self, tools: Vec<serde_json::Value>) -> Self;
    fn with_model(self, model: &str) -> Self;
}

impl RequestExt for GenerationRequest {
    fn with_system(mut self, text: &str) -> Self {
        if let RequestInput::Chat { messages } = &mut self.input {
            messages.insert(
                0,
                ChatMessage {
                    role: Role::System,
                    content: MessageContent::Text(text.to_string()),
                },
            );
        }
        self
    }

    fn with_tools(mut self, tools: Vec<serde_json::Value>) -> Self {
        self.params.tools = Some(tools);
        self
    }

    fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

pub fn chat_request(text: &str, temperature: f64, max_tokens: u32) -> GenerationRequest {
    GenerationRequest {
        provider: "test-provider".to_string(),
        model: "test-model".to_string(),
        input: RequestInput::Chat {
            messages: vec![ChatMessage {
                role: Role::User,
                content: MessageContent::Text(text.to_string()),
            }],
        },
        params: GenerationParams {
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
            ..Default::default()
        },
        stream: false,
    }
}

pub fn stream_request(text: &str, temperature: f64) -> GenerationRequest {
    GenerationRequest {
        stream: true,
        ..chat_request(text, temperature, 100)
    }
}

pub fn response_body(id: &str, text: &str) -> GenerationResponse {
    GenerationResponse {
        id: id.to_string(),
        object: "chat.completion".to_string(),
        created: 1_700_000_000,
        model: "test-model".to_string(),
        choices: vec![serde_json::json!({
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop",
        })],
        usage: Some(Usage {
            prompt_tokens: Some(10),
            completion_tokens: Some(5),
            total_tokens: 15,
        }),
        extra: ResponseExtra {
            provider: Some("test-provider".to_string()),
            ..Default::default()
        },
    }
}

pub fn chunk(index: u32, text: &str, finish_reason: Option<&str>) -> GenerationResponse {
    GenerationResponse {
        id: format!("chunk-{index}"),
        object: "chat.completion.chunk".to_string(),
        created: 1_700_000_000,
        model: "test-model".to_string(),
        choices: vec![serde_json::json!({
            "index": 0,
            "delta": {"content": text},
        })],
        usage: None,
        extra: ResponseExtra {
            provider: Some("test-provider".to_string()),
            chunk_index: Some(index),
            finish_reason: finish_reason.map(str::to_string),
            ..Default::default()
        },
    }
}
