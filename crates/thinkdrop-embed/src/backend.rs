use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use thinkdrop_common::{Error, Result};
use tokenizers::Tokenizer;
use tracing::info;

/// A model that turns short English text into a 384-dim L2-normalised vector.
///
/// The contract is narrow on purpose: the service only ever needs
/// `encode`, so tests and degraded deployments can substitute the
/// deterministic fallback or a mock.
pub trait EmbeddingBackend: Send + Sync {
    fn name(&self) -> &str;
    fn encode(&self, text: &str) -> Result<Vec<f32>>;
}

const MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";
const MODEL_REVISION: &str = "main";

/// BERT-based `all-MiniLM-L6-v2` encoder running on CPU through Candle.
/// Mean pooling over token embeddings, then L2 normalisation.
pub struct MiniLmBackend {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl MiniLmBackend {
    /// Download (or reuse from the Hugging Face cache) and load the model.
    /// Called once at startup; a failure here is fatal to the process.
    pub fn load() -> Result<Self> {
        let device = Device::Cpu;
        let repo = Repo::with_revision(
            MODEL_ID.to_string(),
            RepoType::Model,
            MODEL_REVISION.to_string(),
        );
        let api = Api::new().map_err(|e| Error::Embedding(format!("hub api init failed: {e}")))?;
        let api_repo = api.repo(repo);

        info!("loading embedding model {MODEL_ID}");
        let config_filename = api_repo
            .get("config.json")
            .map_err(|e| Error::Embedding(format!("failed to fetch model config: {e}")))?;
        let tokenizer_filename = api_repo
            .get("tokenizer.json")
            .map_err(|e| Error::Embedding(format!("failed to fetch tokenizer: {e}")))?;
        let weights_filename = api_repo
            .get("model.safetensors")
            .map_err(|e| Error::Embedding(format!("failed to fetch model weights: {e}")))?;

        let config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&config)
            .map_err(|e| Error::Embedding(format!("bad model config: {e}")))?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| Error::Embedding(format!("failed to load tokenizer: {e}")))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(|e| Error::Embedding(format!("failed to map weights: {e}")))?
        };
        let model = BertModel::load(vb, &config)
            .map_err(|e| Error::Embedding(format!("failed to load model: {e}")))?;

        info!("embedding model loaded");
        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Mean pooling over token embeddings, weighted by the attention mask.
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> Result<Tensor> {
        let run = || -> candle_core::Result<Tensor> {
            // embeddings: [1, seq_len, hidden]; mask broadcast to [1, seq_len, 1]
            let mask = Tensor::new(attention_mask, &self.device)?
                .to_dtype(DType::F32)?
                .unsqueeze(0)?
                .unsqueeze(2)?;

            let masked = embeddings.broadcast_mul(&mask)?;
            let sum = masked.sum(1)?;
            let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
            sum.broadcast_div(&count)?.squeeze(0)
        };
        run().map_err(|e| Error::Embedding(format!("mean pooling failed: {e}")))
    }

    fn l2_normalize(&self, tensor: &Tensor) -> Result<Tensor> {
        let run = || -> candle_core::Result<Tensor> {
            let norm = tensor.sqr()?.sum_all()?.sqrt()?;
            tensor.broadcast_div(&norm)
        };
        run().map_err(|e| Error::Embedding(format!("normalisation failed: {e}")))
    }
}

impl EmbeddingBackend for MiniLmBackend {
    fn name(&self) -> &str {
        MODEL_ID
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        // The tokenizer truncates past the model's 512-token window.
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::Embedding(format!("tokenization failed: {e}")))?;

        let encode = || -> candle_core::Result<Tensor> {
            let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
            let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;
            self.model.forward(&token_ids, &token_type_ids, None)
        };
        let output = encode().map_err(|e| Error::Embedding(format!("inference failed: {e}")))?;

        let pooled = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let normalized = self.l2_normalize(&pooled)?;

        normalized
            .to_vec1::<f32>()
            .map_err(|e| Error::Embedding(format!("failed to read embedding: {e}")))
    }
}
