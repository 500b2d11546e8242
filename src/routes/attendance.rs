use crate::{domain::attendance::{AttendanceForAdd, AttendanceForUpdate, AttendanceQuery}, model::{clients::{ClientRole, ConnectedClient}, ModelController}, RsResult};
use axum::{extract::{Path, Query, State}, http::StatusCode, routing::{delete, get, post, put}, Json, Router};
use serde_json::{json, Value};


pub fn routes(mc: ModelController) -> Router {
	Router::new()
		.route("/", post(handler_log))
		.route("/", get(handler_list))
		.route("/:id", put(handler_update))
		.route("/:id", delete(handler_delete))
		.with_state(mc)
}

async fn handler_log(State(mc): State<ModelController>, client: ConnectedClient, Json(attendance): Json<AttendanceForAdd>) -> RsResult<Json<Value>> {
	client.check_role(ClientRole::Operator)?;
	let outcome = mc.log_attendance(&attendance.identity_id).await?;
	Ok(Json(json!(outcome)))
}

async fn handler_list(State(mc): State<ModelController>, client: ConnectedClient, Query(query): Query<AttendanceQuery>) -> RsResult<Json<Value>> {
	client.check_role(ClientRole::Operator)?;
	let records = mc.list_attendance(query.date.as_deref()).await?;
	Ok(Json(json!(records)))
}

async fn handler_update(Path(id): Path<i64>, State(mc): State<ModelController>, client: ConnectedClient, Json(update): Json<AttendanceForUpdate>) -> RsResult<Json<Value>> {
	client.check_role(ClientRole::Operator)?;
	let record = mc.update_attendance(id, update).await?;
	Ok(Json(json!(record)))
}

async fn handler_delete(Path(id): Path<i64>, State(mc): State<ModelController>, client: ConnectedClient) -> RsResult<StatusCode> {
	client.check_role(ClientRole::Operator)?;
	mc.delete_attendance(id).await?;
	Ok(StatusCode::NO_CONTENT)
}
