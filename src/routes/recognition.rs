use crate::{model::{clients::{ClientRole, ConnectedClient}, ModelController}, RsResult};
use axum::{extract::{Multipart, State}, routing::post, Json, Router};
use serde_json::{json, Value};

use super::ImageUpload;


pub fn routes(mc: ModelController) -> Router {
	Router::new()
		.route("/recognize", post(handler_recognize))
		.route("/embeddings/extract", post(handler_extract))
		.with_state(mc)
}

async fn handler_recognize(State(mc): State<ModelController>, client: ConnectedClient, multipart: Multipart) -> RsResult<Json<Value>> {
	client.check_role(ClientRole::Operator)?;
	let image = ImageUpload::read(multipart).await?.take_image()?;
	let outcome = mc.recognize(image).await?;
	Ok(Json(json!(outcome)))
}

async fn handler_extract(State(mc): State<ModelController>, client: ConnectedClient, multipart: Multipart) -> RsResult<Json<Value>> {
	client.check_role(ClientRole::Admin)?;
	let image = ImageUpload::read(multipart).await?.take_image()?;
	let outcome = mc.extract_embedding(image).await?;
	Ok(Json(json!(outcome)))
}
