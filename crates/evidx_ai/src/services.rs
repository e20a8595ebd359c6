use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use evidx_core::config::{EvidxConfig, ReasoningProvider, StoreBackend};
use evidx_core::error::{codes, AppError};
use tracing::info;

use crate::correlate::CorrelationCoordinator;
use crate::embeddings::{EmbeddingOracle, EmbeddingOrchestrator, HttpEmbeddingOracle};
use crate::ingest::Ingestor;
use crate::ollama::OllamaClient;
use crate::pool::WorkerPool;
use crate::processor::ModalityProcessor;
use crate::reasoning::{ChatCompletionsReasoner, EvidenceAnalyst, OllamaReasoner, ReasoningOracle};
use crate::retrieve::Retriever;
use crate::store::{ElasticsearchStore, EvidenceStoreClient, SqliteVectorStore, VectorStore};

/// Explicitly wired service graph. Built once and passed by reference.
pub struct Services {
    pub config: EvidxConfig,
    pub client: Arc<EvidenceStoreClient>,
    pub retriever: Retriever,
    pub coordinator: CorrelationCoordinator,
    pub ingestor: Ingestor,
    /// `None` when reasoning is disabled.
    pub analyst: Option<EvidenceAnalyst>,
}

fn build_store(cfg: &EvidxConfig) -> Result<Arc<dyn VectorStore>, AppError> {
    match cfg.store.backend {
        StoreBackend::Sqlite => Ok(Arc::new(SqliteVectorStore::open(Path::new(&cfg.store.sqlite_path))?)),
        StoreBackend::Elasticsearch => {
            let url = cfg.store.url.as_deref().ok_or_else(|| {
                AppError::new(codes::CONFIG_INVALID, "[store] url is required for elasticsearch")
            })?;
            Ok(Arc::new(ElasticsearchStore::new(
                url,
                cfg.store.api_key.clone(),
                Duration::from_secs(cfg.store.timeout_secs),
            )?))
        }
    }
}

fn build_reasoner(cfg: &EvidxConfig) -> Result<Option<Arc<dyn ReasoningOracle>>, AppError> {
    let r = &cfg.reasoning;
    match r.provider {
        ReasoningProvider::Disabled => Ok(None),
        ReasoningProvider::Ollama => {
            let client = OllamaClient::new(&r.base_url)?;
            Ok(Some(Arc::new(OllamaReasoner::new(client, r.model.clone()))))
        }
        ReasoningProvider::ChatCompletions => Ok(Some(Arc::new(ChatCompletionsReasoner::new(
            &r.base_url,
            r.api_key.clone(),
            r.model.clone(),
            Duration::from_secs(120),
        )?))),
    }
}

impl Services {
    pub fn from_config(cfg: &EvidxConfig) -> Result<Self, AppError> {
        cfg.validate()?;
        let oracle: Arc<dyn EmbeddingOracle> = Arc::new(HttpEmbeddingOracle::new(
            &cfg.embedding.url,
            Duration::from_secs(cfg.embedding.timeout_secs),
        )?);
        let store = build_store(cfg)?;
        let reasoner = build_reasoner(cfg)?;
        Self::with_components(cfg, oracle, store, reasoner)
    }

    /// Wire the graph around caller-supplied oracle and store backends.
    pub fn with_components(
        cfg: &EvidxConfig,
        oracle: Arc<dyn EmbeddingOracle>,
        store: Arc<dyn VectorStore>,
        reasoner: Option<Arc<dyn ReasoningOracle>>,
    ) -> Result<Self, AppError> {
        let dims = cfg.embedding.dims;
        let client = Arc::new(EvidenceStoreClient::connect(store, &cfg.store.index_name, dims)?);
        let pool = Arc::new(WorkerPool::new(cfg.concurrency.max_workers)?);
        let processor = ModalityProcessor::from_config(&cfg.processing);
        let orchestrator = EmbeddingOrchestrator::new(oracle, dims, cfg.embedding.batch_size);
        let retriever = Retriever::new(client.clone(), cfg.retrieval.num_candidates);

        let coordinator = CorrelationCoordinator::new(
            processor.clone(),
            orchestrator.clone(),
            retriever.clone(),
            pool.clone(),
        );
        let ingestor = Ingestor::new(
            processor,
            orchestrator,
            client.clone(),
            pool,
            cfg.embedding.batch_size,
        );
        let analyst = reasoner.map(|r| EvidenceAnalyst::new(r, cfg.reasoning.temperature));

        info!(
            backend = ?cfg.store.backend,
            index = %cfg.store.index_name,
            dims,
            workers = cfg.concurrency.max_workers,
            reasoning = analyst.is_some(),
            "services ready"
        );
        Ok(Self {
            config: cfg.clone(),
            client,
            retriever,
            coordinator,
            ingestor,
            analyst,
        })
    }

    pub fn analyst(&self) -> Result<&EvidenceAnalyst, AppError> {
        self.analyst.as_ref().ok_or_else(|| {
            AppError::new(codes::CONFIG_INVALID, "Reasoning is disabled")
                .with_details("reasoning.provider=disabled")
        })
    }
}
