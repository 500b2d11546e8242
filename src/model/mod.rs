pub mod store;
pub mod error;
pub mod identities;
pub mod recognition;
pub mod attendance;
pub mod clients;

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::{domain::embedding::Embedding, error::{Error, RsResult}, server::ServerConfig, tools::{detection::{DetectionOrchestrator, EncodeProfile}, image_tools::decode_image, log::{log_info, LogServiceType}, match_index::MatchIndex, prototypes::{KeepAll, PrototypeRetention}, recognition::FaceEncoder}};

use self::store::SqliteStore;


#[derive(Clone)]
pub struct ModelController {
	store: Arc<SqliteStore>,
	pub config: Arc<ServerConfig>,
	index: Arc<MatchIndex>,
	detector: Arc<DetectionOrchestrator>,
	encode_permits: Arc<Semaphore>,
	retention: Arc<dyn PrototypeRetention>,
}


// Constructor
impl ModelController {
	pub async fn new(store: SqliteStore, config: ServerConfig, encoder: Arc<dyn FaceEncoder>) -> RsResult<Self> {
		let index = MatchIndex::new(config.embedding_dim, config.refresh_interval());
		let detector = DetectionOrchestrator::new(encoder, config.detection_settings());

		let mc = Self {
			store: Arc::new(store),
			encode_permits: Arc::new(Semaphore::new(config.encode_concurrency.max(1))),
			config: Arc::new(config),
			index: Arc::new(index),
			detector: Arc::new(detector),
			retention: Arc::new(KeepAll),
		};

		let generation = mc.index.refresh(mc.store.as_ref()).await?;
		log_info(LogServiceType::Index, format!("Match index ready (generation {})", generation));
		Ok(mc)
	}

	pub fn with_retention(mut self, retention: Arc<dyn PrototypeRetention>) -> Self {
		self.retention = retention;
		self
	}

	pub fn index(&self) -> &MatchIndex {
		&self.index
	}
}

impl ModelController {
	/// Decodes and encodes `image` on the blocking pool, bounded by the encode semaphore and timeout.
	///
	/// The timeout covers the wait for a permit. On timeout the job keeps its permit until it finishes on its own.
	pub async fn encode_image(&self, image: Vec<u8>, profile: EncodeProfile) -> RsResult<Vec<Embedding>> {
		let max_bytes = self.config.max_image_bytes;
		if image.len() > max_bytes {
			return Err(Error::ImageTooLarge { size: image.len(), max: max_bytes });
		}

		let permits = self.encode_permits.clone();
		let detector = self.detector.clone();
		let job = async move {
			let permit = permits.acquire_owned().await.map_err(|e| Error::Encoder(e.to_string()))?;
			tokio::task::spawn_blocking(move || -> RsResult<Vec<Embedding>> {
				let _permit = permit;
				let decoded = decode_image(&image, max_bytes)?;
				Ok(detector.detect_and_encode(&decoded, profile))
			}).await.map_err(|join_error| Error::Encoder(format!("Encoding task failed: {}", join_error)))?
		};

		match tokio::time::timeout(self.config.encode_timeout(), job).await {
			Err(_) => Err(Error::EncodeTimeout),
			Ok(result) => result,
		}
	}

	/// Encoded embeddings must match the configured dimension before they reach the index or the store.
	fn check_dimension(&self, embedding: &Embedding) -> RsResult<()> {
		if embedding.dim() != self.config.embedding_dim {
			return Err(Error::Encoder(format!("Encoder produced dimension {}, expected {}", embedding.dim(), self.config.embedding_dim)));
		}
		Ok(())
	}
}
