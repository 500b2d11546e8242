use crate::{domain::recognition::RecognizeOutcome, error::RsResult, tools::{log::{log_error, log_info, LogServiceType}, matcher::match_candidates}};

use super::ModelController;


impl ModelController {
	/// 1-NN identification of the face(s) in `image`. "No match" is a normal outcome.
	pub async fn recognize(&self, image: Vec<u8>) -> RsResult<RecognizeOutcome> {
		let candidates = match self.encode_image(image, self.config.recognize_profile()).await {
			Ok(candidates) => candidates,
			Err(error) if error.is_rejected_input() => {
				log_info(LogServiceType::Recognition, format!("Recognition rejected: {}", error.client_message()));
				return Ok(RecognizeOutcome::unrecognized());
			}
			Err(error) => {
				log_error(LogServiceType::Recognition, format!("Recognition failed while encoding: {:?}", error));
				return Err(error);
			}
		};
		if candidates.is_empty() {
			return Ok(RecognizeOutcome::unrecognized());
		}

		let snapshot = self.index.snapshot_fresh(self.store.as_ref()).await;
		let decision = match_candidates(&candidates, &snapshot, self.config.match_threshold);
		match &decision.identity_id {
			Some(identity_id) => {
				log_info(LogServiceType::Recognition, format!("Recognized {} (distance {:.4}, confidence {:.3}, {} candidates)", identity_id, decision.distance.unwrap_or_default(), decision.confidence, candidates.len()));
				Ok(RecognizeOutcome { recognized: true, identity_id: Some(identity_id.clone()), confidence: Some(decision.confidence) })
			}
			None => {
				log_info(LogServiceType::Recognition, format!("No match (best distance {:?}, {} entries)", decision.distance, snapshot.len()));
				Ok(RecognizeOutcome::unrecognized())
			}
		}
	}
}
