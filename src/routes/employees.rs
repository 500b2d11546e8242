use crate::{domain::recognition::MAX_BATCH_PHOTOS, model::{clients::{ClientRole, ConnectedClient}, ModelController}, RsResult, MULTIPART_OVERHEAD};
use axum::{body::Body, extract::{DefaultBodyLimit, Multipart, Path, State}, http::header, response::{IntoResponse, Response}, routing::{get, post}, Json, Router};
use serde_json::{json, Value};

use super::ImageUpload;


pub fn routes(mc: ModelController) -> Router {
	let batch_limit = mc.config.max_image_bytes.saturating_mul(MAX_BATCH_PHOTOS).saturating_add(MULTIPART_OVERHEAD);
	Router::new()
		.route("/", get(handler_list))
		.route("/", post(handler_register))
		.route("/register-photos", post(handler_register_photos).layer(DefaultBodyLimit::max(batch_limit)))
		.route("/:id/photo", get(handler_photo))
		.with_state(mc)
}

async fn handler_list(State(mc): State<ModelController>, client: ConnectedClient) -> RsResult<Json<Value>> {
	client.check_role(ClientRole::Operator)?;
	let identities = mc.get_identities().await?;
	Ok(Json(json!(identities)))
}

async fn handler_register(State(mc): State<ModelController>, client: ConnectedClient, multipart: Multipart) -> RsResult<Json<Value>> {
	client.check_role(ClientRole::Admin)?;
	let mut upload = ImageUpload::read(multipart).await?;
	let image = upload.take_image()?;
	let outcome = mc.register_identity(upload.field("identity_id"), upload.field("display_name"), image).await?;
	Ok(Json(json!(outcome)))
}

async fn handler_register_photos(State(mc): State<ModelController>, client: ConnectedClient, multipart: Multipart) -> RsResult<Json<Value>> {
	client.check_role(ClientRole::Admin)?;
	let mut upload = ImageUpload::read(multipart).await?;
	let images = upload.take_images()?;
	let outcome = mc.register_identity_batch(upload.field("identity_id"), upload.field("display_name"), images).await?;
	Ok(Json(json!(outcome)))
}

async fn handler_photo(Path(identity_id): Path<String>, State(mc): State<ModelController>, client: ConnectedClient) -> RsResult<Response> {
	client.check_role(ClientRole::Admin)?;
	let photo = mc.identity_photo(&identity_id).await?;
	let content_type = image::guess_format(&photo).map(|format| format.to_mime_type().to_string()).unwrap_or_else(|_| mime::APPLICATION_OCTET_STREAM.to_string());
	Ok(([(header::CONTENT_TYPE, content_type)], Body::from(photo)).into_response())
}
