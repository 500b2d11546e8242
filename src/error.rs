use std::sync::Arc;

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use derive_more::From;
use serde_json::json;
use serde_with::{serde_as, DisplayFromStr};
use nanoid::nanoid;

use crate::tools::log::{log_error, LogServiceType};

pub type RsResult<T> = core::result::Result<T, Error>;

#[serde_as]
#[derive(Debug, Serialize, From, strum_macros::AsRefStr)]
#[serde(tag = "type", content = "data")]
pub enum Error {
	NotFound,
	InvalidParams(String),

	// -- Image errors.
	InvalidImage,
	ImageTooLarge { size: usize, max: usize },
	NoFaceDetected,

	// -- Encoder errors.
	EncodeTimeout,
	Encoder(String),

	// -- Auth errors.
	Forbiden,
	AuthFail,

	// -- Database errors.
	PersistenceUnavailable(String),

	// -- Servers errors.
	ConfigurationInvalid(String),
	ServerUnableToAccessServerLocalFolder,

	// -- Externals

	#[from]
	Model(#[serde_as(as = "DisplayFromStr")] crate::model::error::Error),

	#[from]
	Io(#[serde_as(as = "DisplayFromStr")] std::io::Error),

	#[from]
	Serde(#[serde_as(as = "DisplayFromStr")] serde_json::Error),

	#[from]
	Image(#[serde_as(as = "DisplayFromStr")] image::ImageError),
}

// region:    --- Error Boilerplate
impl core::fmt::Display for Error {
	fn fmt(
		&self,
		fmt: &mut core::fmt::Formatter,
	) -> core::result::Result<(), core::fmt::Error> {
		write!(fmt, "{self:?}")
	}
}

impl std::error::Error for Error {}
// endregion: --- Error Boilerplate

impl From<tokio_rusqlite::Error> for Error {
	fn from(value: tokio_rusqlite::Error) -> Self {
		Error::Model(value.into())
	}
}

impl From<rusqlite::Error> for Error {
	fn from(value: rusqlite::Error) -> Self {
		Error::Model(value.into())
	}
}

impl IntoResponse for Error {
	fn into_response(self) -> Response {
		let nanoid = nanoid!();
		log_error(LogServiceType::Other, format!("{} - {:?}", nanoid, self));
		let (status_code, client_error) = self.client_status_and_error();

		let error_json = json!({
						"error": {
							"type": client_error.as_ref(),
							"req_uuid": nanoid.to_string(),
						}
					});

		let mut error_response = (status_code, Json(error_json)).into_response();

		// Insert the Error into the reponse.
		error_response.extensions_mut().insert(Arc::new(self));

		error_response
	}
}

impl Error {
	/// Errors a client caused with its upload, answered as an unsuccessful outcome instead of a failure.
	pub fn is_rejected_input(&self) -> bool {
		matches!(self, Self::InvalidImage | Self::ImageTooLarge { .. } | Self::NoFaceDetected)
	}

	/// Message shown in `{success: false, message}` bodies.
	pub fn client_message(&self) -> String {
		match self {
			Self::InvalidImage => "Invalid image".to_string(),
			Self::ImageTooLarge { size, max } => format!("Image too large ({} bytes, max {})", size, max),
			Self::NoFaceDetected => "No face detected".to_string(),
			Self::EncodeTimeout => "Face encoding timed out".to_string(),
			Self::InvalidParams(message) => message.to_string(),
			_ => "Internal error".to_string(),
		}
	}

	pub fn client_status_and_error(&self) -> (StatusCode, ClientError) {
		#[allow(unreachable_patterns)]
		match self {
			Self::NotFound => (StatusCode::NOT_FOUND, ClientError::NOT_FOUND),
			Self::Model(err) => err.client_status_and_error(),

			Self::InvalidParams(_) => (StatusCode::BAD_REQUEST, ClientError::INVALID_PARAMS),
			Self::InvalidImage | Self::NoFaceDetected => (StatusCode::BAD_REQUEST, ClientError::INVALID_PARAMS),
			Self::ImageTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, ClientError::INVALID_PARAMS),

			// -- Auth.
			Self::Forbiden => (StatusCode::FORBIDDEN, ClientError::FORBIDDEN),
			Self::AuthFail => (StatusCode::UNAUTHORIZED, ClientError::NO_AUTH),

			Self::EncodeTimeout => (StatusCode::SERVICE_UNAVAILABLE, ClientError::TIMEOUT),

			// -- Fallback.
			_ => (
				StatusCode::INTERNAL_SERVER_ERROR,
				ClientError::SERVICE_ERROR,
			),
		}
	}
}


#[derive(Debug, strum_macros::AsRefStr)]
#[allow(non_camel_case_types)]
pub enum ClientError {
	NO_AUTH,
	FORBIDDEN,
	NOT_FOUND,
	INVALID_PARAMS,
	TIMEOUT,
	SERVICE_ERROR,
}
