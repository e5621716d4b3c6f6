use thiserror::Error;

pub type Result<T> = std::result::Result<T, SbxError>;

#[derive(Debug, Error)]
pub enum SbxError {
	#[error("missing dependencies: {0}")]
	MissingDependencies(String),

	#[error(transparent)]
	Runtime(#[from] sbx_runtime::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}
