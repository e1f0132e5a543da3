//! Error types for dynakit.
//!
//! Two layers of errors live here:
//! - [`EngineError`] is what a [`StorageEngine`](crate::engine::StorageEngine)
//!   reports. DynamoDB failures are mapped using typed `SdkError` variant
//!   matching and error metadata codes, never by parsing debug output.
//! - [`AccessError`] is what the access-layer components return. It carries the
//!   domain outcomes (`NotFound`, `AlreadyExists`, `AuthorizationFailure`, ...)
//!   that callers are expected to branch on.

use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// Failure reported by a storage engine call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A condition expression on a put, update or delete evaluated to false.
    #[error("The condition expression evaluated to false")]
    ConditionFailed,

    /// A transaction was canceled for a reason other than a failed condition.
    #[error("Transaction was canceled: {0}")]
    TransactionCanceled(String),

    /// The table or index does not exist.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// The engine rejected the request shape (limits, paths, types).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Request rate too high for the table or account.
    #[error("Request rate too high: {0}")]
    Throttled(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Credentials error: {0}")]
    Credentials(String),

    /// Dispatch or timeout failure before a response was received.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Any other service-side failure.
    #[error("Engine error: {0}")]
    Service(String),
}

impl EngineError {
    /// Whether a caller-side retry could succeed.
    ///
    /// This layer never retries on its own; the flag is informational.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Throttled(_) | EngineError::Connection(_))
    }
}

/// Failure returned by the access-layer components.
#[derive(Error, Debug)]
pub enum AccessError {
    /// Malformed or missing input, detected before any engine call.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Item with key {key} does not exist in table '{table}'")]
    NotFound { table: String, key: String },

    /// An existence-guarded create found the key already present.
    #[error("Item with key {key} already exists in table '{table}'")]
    AlreadyExists { table: String, key: String },

    /// The requesting identity is not a member of the authorization record.
    #[error("'{identity}' is not authorized by {auth_key}")]
    AuthorizationFailure { identity: String, auth_key: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// One or more chunks of a best-effort batch did not fully succeed.
    #[error("{} of {total} batch chunks failed (ordinals {failed:?})", .failed.len())]
    PartialBatchFailure { failed: Vec<usize>, total: usize },

    /// A stored item does not have the shape of the record being decoded.
    #[error("Failed to decode item: {0}")]
    Decode(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AccessError {
    /// Only transient engine failures are worth retrying.
    ///
    /// `AuthorizationFailure` and `AlreadyExists` are logical outcomes and
    /// will fail again with the same input.
    pub fn is_retryable(&self) -> bool {
        match self {
            AccessError::Engine(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// A specialized `Result` type for access-layer operations.
pub type Result<T> = std::result::Result<T, AccessError>;

// ========== TYPED ERROR MAPPING ==========

/// Map non-service `SdkError` variants (dispatch failures, timeouts, etc.).
///
/// Returns `None` for `ServiceError`, which needs the error metadata.
fn map_outer_sdk_error<E, R>(err: &SdkError<E, R>) -> Option<EngineError>
where
    E: std::fmt::Debug,
    R: std::fmt::Debug,
{
    match err {
        SdkError::DispatchFailure(dispatch) => {
            if dispatch.is_timeout() {
                Some(EngineError::Connection(
                    "Connection timed out to DynamoDB. Check your network or endpoint.".into(),
                ))
            } else if dispatch.is_io() {
                Some(EngineError::Connection(
                    "Connection failed to DynamoDB (I/O error). Check if the endpoint is reachable."
                        .into(),
                ))
            } else {
                Some(EngineError::Connection(
                    "Connection failed to DynamoDB. Check if the endpoint is reachable.".into(),
                ))
            }
        }
        SdkError::TimeoutError(_) => Some(EngineError::Connection(
            "Connection timed out to DynamoDB. Check your network or endpoint.".into(),
        )),
        SdkError::ConstructionFailure(err) => {
            let msg = format!("{:?}", err);
            if msg.contains("credentials")
                || msg.contains("Credentials")
                || msg.contains("NoCredentialsError")
            {
                Some(EngineError::Credentials(
                    "No AWS credentials found. Configure credentials via environment variables \
                    (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY), AWS profile, or IAM role."
                        .into(),
                ))
            } else {
                Some(EngineError::Service(format!(
                    "Failed to build request: {}",
                    msg
                )))
            }
        }
        SdkError::ResponseError(err) => Some(EngineError::Service(format!(
            "Invalid response from DynamoDB: {:?}",
            err
        ))),
        SdkError::ServiceError(_) => None,
        _ => Some(EngineError::Service(format!(
            "Unknown error from DynamoDB: {:?}",
            err
        ))),
    }
}

/// Map a DynamoDB service error code + message to an [`EngineError`].
fn map_dynamodb_code(
    code: Option<&str>,
    message: Option<&str>,
    display: &str,
    table: Option<&str>,
) -> EngineError {
    let msg = message.unwrap_or(display).to_string();

    match code {
        Some("ConditionalCheckFailedException") => EngineError::ConditionFailed,
        Some("TransactionCanceledException") => EngineError::TransactionCanceled(msg),
        Some("ResourceNotFoundException") => EngineError::ResourceNotFound(match table {
            Some(t) => format!("Table '{}' not found", t),
            None => "Resource not found".to_string(),
        }),
        Some("ValidationException") => EngineError::Validation(msg),
        Some("ItemCollectionSizeLimitExceededException") => {
            EngineError::Validation("Item collection size limit exceeded".into())
        }
        Some("UnrecognizedClientException") => {
            EngineError::Credentials("Invalid AWS credentials. Check your access key and secret.".into())
        }
        Some("ExpiredTokenException") | Some("ExpiredToken") => EngineError::Credentials(
            "AWS credentials have expired. Refresh your session token.".into(),
        ),
        Some("AccessDeniedException") | Some("AccessDenied") => EngineError::AccessDenied(
            message.unwrap_or("Check your IAM permissions.").to_string(),
        ),
        Some("ProvisionedThroughputExceededException")
        | Some("LimitExceededException")
        | Some("RequestLimitExceeded")
        | Some("ThrottlingException")
        | Some("TransactionConflictException") => EngineError::Throttled(msg),
        _ => EngineError::Service(msg),
    }
}

/// Map DynamoDB SDK errors using typed `SdkError` variants.
///
/// For `ServiceError`, uses `ProvideErrorMetadata` to get the error code and
/// message instead of parsing debug strings.
pub fn map_sdk_error<E, R>(err: SdkError<E, R>, table: Option<&str>) -> EngineError
where
    E: ProvideErrorMetadata + std::fmt::Debug + std::fmt::Display,
    R: std::fmt::Debug,
{
    if let Some(engine_err) = map_outer_sdk_error(&err) {
        return engine_err;
    }

    if let Some(service_err) = err.as_service_error() {
        let display = service_err.to_string();
        return map_dynamodb_code(service_err.code(), service_err.message(), &display, table);
    }

    EngineError::Service(format!("Unexpected DynamoDB error: {:?}", err))
}

/// Map a canceled transaction by inspecting its cancellation reasons.
///
/// A transaction where any action reports `ConditionalCheckFailed` becomes
/// [`EngineError::ConditionFailed`]; everything else keeps its mapped kind.
pub fn map_cancellation_reasons<'a, I>(codes: I, message: Option<&str>) -> EngineError
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let codes: Vec<&str> = codes.into_iter().flatten().collect();
    if codes.contains(&"ConditionalCheckFailed") {
        return EngineError::ConditionFailed;
    }
    if codes.contains(&"ThrottlingError") || codes.contains(&"TransactionConflict") {
        return EngineError::Throttled(codes.join(", "));
    }
    EngineError::TransactionCanceled(
        message
            .map(str::to_string)
            .unwrap_or_else(|| codes.join(", ")),
    )
}
