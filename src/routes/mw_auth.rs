use axum::async_trait;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::model::clients::ConnectedClient;
use crate::model::ModelController;
use crate::{error::Error, RsResult};

const BEARER: &str = "Bearer ";
const API_KEY_HEADER: &str = "x-api-key";


fn api_key(headers: &HeaderMap) -> Option<String> {
    match headers.get("AUTHORIZATION").and_then(|t| t.to_str().ok()) {
        Some(token) => Some(token.trim_start_matches(BEARER).to_string()),
        None => headers.get(API_KEY_HEADER).and_then(|t| t.to_str().ok()).map(|t| t.to_string()),
    }
}

pub async fn mw_api_key_resolver(mc: State<ModelController>, headers: HeaderMap, mut req: Request, next: Next) -> RsResult<Response> {
    let key = api_key(&headers);
    let connected_client = mc.resolve_api_key(key.as_deref())?;
    req.extensions_mut().insert(connected_client);

    Ok(next.run(req).await)
}


#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ConnectedClient {
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> RsResult<Self> {
		let client = parts
			.extensions
			.get::<ConnectedClient>().ok_or(Error::AuthFail)?
			.clone();

		Ok(client)
	}
}
