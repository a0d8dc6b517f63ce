pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	/// Data-integrity rejection, such as a foreign interaction id or a duplicate chunk ordinal.
	#[error("Conflict: {message}")]
	Conflict { message: String },
	/// The operation needs configuration that is missing or unusable.
	#[error("Configuration error: {message}")]
	Configuration { message: String },
	/// A required collaborator failed and no partial result is possible.
	#[error("Unavailable: {message}")]
	Unavailable { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl Error {
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidRequest { .. } => "INVALID_REQUEST",
			Self::NotFound { .. } => "NOT_FOUND",
			Self::Conflict { .. } => "CONFLICT",
			Self::Configuration { .. } => "CONFIGURATION",
			Self::Unavailable { .. } => "UNAVAILABLE",
			Self::Provider { .. } => "PROVIDER_ERROR",
			Self::Storage { .. } => "STORAGE_ERROR",
		}
	}

	pub(crate) fn invalid(message: impl Into<String>) -> Self {
		Self::InvalidRequest { message: message.into() }
	}
}
impl From<sage_storage::Error> for Error {
	fn from(err: sage_storage::Error) -> Self {
		match err {
			sage_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			sage_storage::Error::NotFound(message) => Self::NotFound { message },
			sage_storage::Error::Conflict(message) => Self::Conflict { message },
			sage_storage::Error::Sqlx(err) => Self::Storage { message: err.to_string() },
		}
	}
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}
impl From<sage_providers::Error> for Error {
	fn from(err: sage_providers::Error) -> Self {
		match err {
			sage_providers::Error::InvalidConfig { message } => Self::Configuration { message },
			other => Self::Provider { message: other.to_string() },
		}
	}
}
