use crate::{domain::{identity::{Identity, IdentityForUpsert, IdentitySummary, PrototypePayload}, recognition::{BatchRegisterOutcome, ExtractOutcome, PhotoOutcome, RegisterOutcome, MAX_BATCH_PHOTOS, MIN_INITIAL_PHOTOS}}, error::{Error, RsResult}, tools::{clock::now, log::{log_error, log_info, log_warn, LogServiceType}, prototypes::consolidate}};

use super::{error::Error as ModelError, ModelController};


impl ModelController {
	/// Adds one sample to an identity, creating it on first registration.
	///
	/// Nothing is written when no face is found or anything fails before the upsert.
	pub async fn register_identity(&self, identity_id: &str, display_name: &str, image: Vec<u8>) -> RsResult<RegisterOutcome> {
		let identity_id = identity_id.trim();
		let display_name = display_name.trim();
		if identity_id.is_empty() || display_name.is_empty() {
			return Ok(RegisterOutcome::failed("identity_id and display_name are required"));
		}

		let photo = image.clone();
		let embedding = match self.encode_image(image, self.config.register_profile()).await {
			Ok(embeddings) => embeddings.into_iter().next(),
			Err(error) if error.is_rejected_input() => {
				log_info(LogServiceType::Register, format!("Registration of {} rejected: {}", identity_id, error.client_message()));
				return Ok(RegisterOutcome::failed(error.client_message()));
			}
			Err(error) => {
				log_error(LogServiceType::Register, format!("Registration of {} failed while encoding: {:?}", identity_id, error));
				return Err(error);
			}
		};
		let Some(embedding) = embedding else {
			log_info(LogServiceType::Register, format!("Registration of {} rejected: no face detected", identity_id));
			return Ok(RegisterOutcome::failed(Error::NoFaceDetected.client_message()));
		};
		self.check_dimension(&embedding)?;

		let mut previous = match self.store.get_identity(identity_id).await {
			Ok(existing) => existing.map(|identity| identity.prototypes).unwrap_or_default(),
			// an unreadable payload is replaced by the new sample
			Err(error @ ModelError::InvalidPayload { .. }) => {
				log_warn(LogServiceType::Register, format!("Rebuilding prototypes of {} from scratch: {}", identity_id, error));
				vec![]
			}
			Err(error) => {
				log_error(LogServiceType::Register, format!("Unable to load identity {}: {:?}", identity_id, error));
				return Err(error.into());
			}
		};
		let before = previous.len();
		previous.retain(|p| p.dim() == self.config.embedding_dim);
		if previous.len() != before {
			log_warn(LogServiceType::Register, format!("Dropped {} stored prototypes of {} with a stale dimension", before - previous.len(), identity_id));
		}

		let prototypes = consolidate(&previous, embedding, self.config.max_prototypes);
		let prototypes = self.retention.retain(&Identity {
			identity_id: identity_id.to_string(),
			display_name: display_name.to_string(),
			prototypes,
			samples_count: 0,
		});

		let update = IdentityForUpsert {
			identity_id: identity_id.to_string(),
			display_name: display_name.to_string(),
			payload: PrototypePayload::from_prototypes(prototypes.clone()),
			photo: Some(photo),
		};
		let samples_count = self.store.upsert_identity(update, now().timestamp_millis()).await.map_err(|error| {
			log_error(LogServiceType::Register, format!("Unable to persist identity {}: {:?}", identity_id, error));
			error
		})?;
		self.index.upsert(identity_id, &prototypes).await;

		log_info(LogServiceType::Register, format!("Registered {} ({} samples, {} prototypes)", identity_id, samples_count, prototypes.len()));
		Ok(RegisterOutcome::registered(samples_count, prototypes.len()))
	}

	/// Registers several photos of one identity in upload order, each through [`Self::register_identity`].
	///
	/// A batch creating the identity needs at least [`MIN_INITIAL_PHOTOS`]. A failing photo does not stop the others.
	pub async fn register_identity_batch(&self, identity_id: &str, display_name: &str, images: Vec<Vec<u8>>) -> RsResult<BatchRegisterOutcome> {
		let identity_id = identity_id.trim();
		if identity_id.is_empty() || display_name.trim().is_empty() {
			return Err(Error::InvalidParams("identity_id and display_name are required".to_string()));
		}
		if images.is_empty() || images.len() > MAX_BATCH_PHOTOS {
			return Err(Error::InvalidParams(format!("Between 1 and {} photos are required", MAX_BATCH_PHOTOS)));
		}
		if !self.store.identity_exists(identity_id).await? && images.len() < MIN_INITIAL_PHOTOS {
			return Err(Error::InvalidParams(format!("A first registration needs between {} and {} photos", MIN_INITIAL_PHOTOS, MAX_BATCH_PHOTOS)));
		}

		let mut results = Vec::with_capacity(images.len());
		for (index, image) in images.into_iter().enumerate() {
			let result = match self.register_identity(identity_id, display_name, image).await {
				Ok(outcome) => PhotoOutcome { index, success: outcome.success, message: outcome.message },
				Err(error) => PhotoOutcome { index, success: false, message: error.client_message() },
			};
			results.push(result);
		}

		let outcome = BatchRegisterOutcome::from_results(results);
		log_info(LogServiceType::Register, format!("Batch registration of {}: {}", identity_id, outcome.message));
		Ok(outcome)
	}

	pub async fn get_identities(&self) -> RsResult<Vec<IdentitySummary>> {
		Ok(self.store.get_identities().await?)
	}

	pub async fn get_identity(&self, identity_id: &str) -> RsResult<Option<Identity>> {
		Ok(self.store.get_identity(identity_id).await?)
	}

	/// Last registration image of an identity.
	pub async fn identity_photo(&self, identity_id: &str) -> RsResult<Vec<u8>> {
		self.store.get_identity_photo(identity_id).await?.ok_or(Error::NotFound)
	}

	/// Embedding of the face in `image` with the registration profile, nothing is stored.
	pub async fn extract_embedding(&self, image: Vec<u8>) -> RsResult<ExtractOutcome> {
		let embeddings = match self.encode_image(image, self.config.register_profile()).await {
			Ok(embeddings) => embeddings,
			Err(error) if error.is_rejected_input() => {
				return Ok(ExtractOutcome { success: false, message: error.client_message(), embedding: None });
			}
			Err(error) => return Err(error),
		};
		match embeddings.into_iter().next() {
			Some(embedding) => {
				self.check_dimension(&embedding)?;
				Ok(ExtractOutcome { success: true, message: "Embedding extracted".to_string(), embedding: Some(embedding) })
			}
			None => Ok(ExtractOutcome { success: false, message: Error::NoFaceDetected.client_message(), embedding: None }),
		}
	}
}


#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use crate::{domain::embedding::Embedding, model::tests::{blank, controller, controller_with, face, test_config}, server::ServerConfig, tools::{prototypes::PrototypeRetention, recognition::testing::FixedEncoder}};

	use super::*;

	fn e(values: &[f32]) -> Embedding {
		Embedding::new(values.to_vec())
	}

	#[tokio::test]
	async fn test_register_then_update() {
		let mc = controller().await;
		let outcome = mc.register_identity("E1", "Ada", face(255, 0, 0)).await.unwrap();
		assert_eq!(outcome, RegisterOutcome { success: true, message: "Employee registered".to_string() });
		let identity = mc.get_identity("E1").await.unwrap().unwrap();
		assert_eq!(identity.prototypes, vec![e(&[1.0, 0.0, 0.0])]);
		assert_eq!(identity.samples_count, 1);

		let outcome = mc.register_identity("E1", "Ada", face(0, 255, 0)).await.unwrap();
		assert_eq!(outcome.message, "Employee embedding updated (2 samples, 2 prototypes)");
		let identity = mc.get_identity("E1").await.unwrap().unwrap();
		assert_eq!(identity.prototypes, vec![e(&[1.0, 0.0, 0.0]), e(&[0.0, 1.0, 0.0])]);
		assert_eq!(identity.centroid(), Some(e(&[0.5, 0.5, 0.0])));

		// the index sees the new set without a refresh
		let snapshot = mc.index().snapshot().await;
		assert_eq!(snapshot.prototypes_of("E1"), identity.prototypes);
	}

	#[tokio::test]
	async fn test_prototypes_stay_bounded() {
		let config = ServerConfig { max_prototypes: 6, ..test_config() };
		let mc = controller_with(config, Arc::new(FixedEncoder::default())).await;
		let colors: [(u8, u8, u8); 7] = [(10, 0, 0), (12, 0, 0), (200, 0, 0), (0, 200, 0), (0, 0, 200), (200, 200, 0), (90, 90, 90)];
		for (r, g, b) in colors {
			assert!(mc.register_identity("E1", "Ada", face(r, g, b)).await.unwrap().success);
		}
		let identity = mc.get_identity("E1").await.unwrap().unwrap();
		assert_eq!(identity.samples_count, 7);
		assert_eq!(identity.prototypes.len(), 6);
		let v7 = e(&[90.0 / 255.0, 90.0 / 255.0, 90.0 / 255.0]);
		assert!(identity.prototypes.iter().any(|p| p.distance(&v7) < 1e-6));
		assert_eq!(mc.index().snapshot().await.prototypes_of("E1").len(), 6);
	}

	#[tokio::test]
	async fn test_no_face_writes_nothing() {
		let mc = controller().await;
		let outcome = mc.register_identity("E1", "Ada", blank()).await.unwrap();
		assert_eq!(outcome, RegisterOutcome::failed("No face detected"));
		assert!(mc.get_identities().await.unwrap().is_empty());
		assert!(mc.index().snapshot().await.is_empty());

		let outcome = mc.register_identity("E1", "Ada", b"not an image".to_vec()).await.unwrap();
		assert!(!outcome.success);
		assert!(!mc.register_identity(" ", "Ada", face(1, 2, 3)).await.unwrap().success);
	}

	#[tokio::test]
	async fn test_encoder_failure_is_not_found() {
		let mc = controller_with(test_config(), Arc::new(FixedEncoder::failing())).await;
		let outcome = mc.register_identity("E1", "Ada", face(1, 2, 3)).await.unwrap();
		assert!(!outcome.success);
		assert!(mc.get_identities().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_wrong_dimension_is_an_error() {
		let config = ServerConfig { embedding_dim: 128, ..test_config() };
		let mc = controller_with(config, Arc::new(FixedEncoder::default())).await;
		assert!(matches!(mc.register_identity("E1", "Ada", face(1, 2, 3)).await, Err(Error::Encoder(_))));
		assert!(mc.get_identities().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_photo_and_listing() {
		let mc = controller().await;
		let image = face(40, 50, 60);
		mc.register_identity("E2", "Bob", image.clone()).await.unwrap();
		mc.register_identity("E1", "Ada", face(1, 2, 3)).await.unwrap();
		assert_eq!(mc.identity_photo("E2").await.unwrap(), image);
		assert!(mc.identity_photo("E9").await.is_err());

		let list = mc.get_identities().await.unwrap();
		assert_eq!(list, vec![
			IdentitySummary { display_name: "Ada".to_string(), identity_id: "E1".to_string(), samples_count: 1 },
			IdentitySummary { display_name: "Bob".to_string(), identity_id: "E2".to_string(), samples_count: 1 },
		]);
	}

	#[tokio::test]
	async fn test_extract_does_not_persist() {
		let mc = controller().await;
		let outcome = mc.extract_embedding(face(255, 255, 0)).await.unwrap();
		assert!(outcome.success);
		assert_eq!(outcome.embedding, Some(e(&[1.0, 1.0, 0.0])));
		assert!(mc.get_identities().await.unwrap().is_empty());

		let outcome = mc.extract_embedding(blank()).await.unwrap();
		assert!(!outcome.success);
		assert_eq!(outcome.embedding, None);
	}

	#[tokio::test]
	async fn test_register_repairs_unreadable_payload() {
		let mc = controller().await;
		let connection = mc.store.pool().get().await.unwrap();
		connection.call(|conn| {
			conn.execute("INSERT INTO identities (identity_id, display_name, prototype_payload, samples_count, added, modified) VALUES ('E1', 'Ada', '\"nope\"', 3, 0, 0)", [])?;
			Ok(())
		}).await.unwrap();
		drop(connection);
		assert!(mc.get_identity("E1").await.is_err());

		let outcome = mc.register_identity("E1", "Ada", face(255, 0, 0)).await.unwrap();
		assert!(outcome.success);
		let identity = mc.get_identity("E1").await.unwrap().unwrap();
		assert_eq!(identity.prototypes, vec![e(&[1.0, 0.0, 0.0])]);
		assert_eq!(identity.samples_count, 4);
		assert_eq!(mc.index().snapshot().await.prototypes_of("E1"), identity.prototypes);
	}

	#[tokio::test]
	async fn test_batch_registration() {
		let mc = controller().await;
		let photos = || vec![face(255, 0, 0), face(0, 255, 0), blank(), face(0, 0, 255), face(200, 200, 0)];

		// a first registration needs enough photos
		assert!(matches!(mc.register_identity_batch("E1", "Ada", photos()[..4].to_vec()).await, Err(Error::InvalidParams(_))));
		assert!(matches!(mc.register_identity_batch("E1", "Ada", vec![face(1, 2, 3); 11]).await, Err(Error::InvalidParams(_))));
		assert!(matches!(mc.register_identity_batch("E1", " ", photos()).await, Err(Error::InvalidParams(_))));
		assert!(mc.get_identities().await.unwrap().is_empty());

		let outcome = mc.register_identity_batch("E1", "Ada", photos()).await.unwrap();
		assert!(outcome.success);
		assert_eq!((outcome.photos_processed, outcome.failed_photos), (4, 1));
		assert_eq!(outcome.message, "4 of 5 photos registered");
		assert_eq!(outcome.results[2], PhotoOutcome { index: 2, success: false, message: "No face detected".to_string() });
		let identity = mc.get_identity("E1").await.unwrap().unwrap();
		assert_eq!(identity.samples_count, 4);
		assert_eq!(identity.prototypes.len(), 4);

		// an existing identity accepts a single photo
		let outcome = mc.register_identity_batch("E1", "Ada", vec![face(90, 90, 90)]).await.unwrap();
		assert_eq!(outcome.results, vec![PhotoOutcome { index: 0, success: true, message: "Employee embedding updated (5 samples, 5 prototypes)".to_string() }]);
		assert_eq!(mc.index().snapshot().await.prototypes_of("E1").len(), 5);
	}

	struct KeepLast(usize);

	impl PrototypeRetention for KeepLast {
		fn retain(&self, identity: &Identity) -> Vec<Embedding> {
			let skip = identity.prototypes.len().saturating_sub(self.0);
			identity.prototypes[skip..].to_vec()
		}
	}

	#[tokio::test]
	async fn test_retention_hook_applies() {
		let mc = controller().await.with_retention(Arc::new(KeepLast(1)));
		mc.register_identity("E1", "Ada", face(255, 0, 0)).await.unwrap();
		let outcome = mc.register_identity("E1", "Ada", face(0, 255, 0)).await.unwrap();
		assert_eq!(outcome.message, "Employee embedding updated (2 samples, 1 prototypes)");
		assert_eq!(mc.get_identity("E1").await.unwrap().unwrap().prototypes, vec![e(&[0.0, 1.0, 0.0])]);
	}
}
