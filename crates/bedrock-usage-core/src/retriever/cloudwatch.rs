//! CloudWatch Logs backed store
//!
//! Uses `FilterLogEvents` against the Bedrock invocation log group. The SDK's
//! own retries are disabled; [`super::LogRetriever`] owns the retry policy.

use aws_config::retry::RetryConfig as SdkRetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatchlogs::operation::filter_log_events::FilterLogEventsError;
use aws_sdk_cloudwatchlogs::types::FilteredLogEvent;
use aws_sdk_cloudwatchlogs::Client;
use tracing::{debug, info};

use super::{LogPage, LogStore, PageRequest};
use crate::config::{Config, LogsConfig};
use crate::error::RetrievalError;
use crate::models::RawLogEvent;

/// Reads Bedrock invocation events from a CloudWatch log group
#[derive(Debug, Clone)]
pub struct CloudWatchLogStore {
    client: Client,
    log_group_name: String,
    log_stream_names: Vec<String>,
    page_size: Option<i32>,
}

impl CloudWatchLogStore {
    /// Wrap an existing client
    pub fn new(client: Client, logs: &LogsConfig) -> Self {
        Self {
            client,
            log_group_name: logs.log_group_name.clone(),
            log_stream_names: logs.log_stream_names.clone(),
            page_size: logs.page_size,
        }
    }

    /// Build a client from the process configuration and the SDK's
    /// default credential chain
    pub async fn from_config(config: &Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(SdkRetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.aws.request_timeout)
                    .build(),
            );

        if let Some(region) = &config.aws.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &config.aws.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = &config.aws.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        info!(
            region = ?sdk_config.region(),
            log_group = %config.logs.log_group_name,
            "CloudWatch Logs client ready"
        );

        Self::new(Client::new(&sdk_config), &config.logs)
    }
}

#[async_trait::async_trait]
impl LogStore for CloudWatchLogStore {
    async fn fetch_page(&self, request: &PageRequest) -> Result<LogPage, RetrievalError> {
        debug!(
            log_group = %self.log_group_name,
            start_ms = request.start_ms,
            end_ms = request.end_ms,
            has_token = request.next_token.is_some(),
            "FilterLogEvents"
        );

        let streams = (!self.log_stream_names.is_empty()).then(|| self.log_stream_names.clone());

        let output = self
            .client
            .filter_log_events()
            .log_group_name(&self.log_group_name)
            .set_log_stream_names(streams)
            .start_time(request.start_ms)
            .end_time(request.end_ms)
            .set_filter_pattern(request.filter_pattern.clone())
            .set_next_token(request.next_token.clone())
            .set_limit(self.page_size)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let events = output
            .events()
            .iter()
            .map(convert_event)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LogPage {
            events,
            next_token: output.next_token().map(str::to_string),
        })
    }
}

fn convert_event(event: &FilteredLogEvent) -> Result<RawLogEvent, RetrievalError> {
    let timestamp_ms = event.timestamp().ok_or_else(|| {
        RetrievalError::MalformedPage(format!(
            "event {} has no timestamp",
            event.event_id().unwrap_or("<no id>")
        ))
    })?;

    Ok(RawLogEvent {
        event_id: event.event_id().map(str::to_string),
        timestamp_ms,
        log_stream_name: event.log_stream_name().map(str::to_string),
        message: event.message().unwrap_or_default().to_string(),
    })
}

fn classify_sdk_error(err: SdkError<FilterLogEventsError>) -> RetrievalError {
    let detail = DisplayErrorContext(&err).to_string();

    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            RetrievalError::Unavailable(detail)
        }
        SdkError::ConstructionFailure(_) => RetrievalError::InvalidRequest(detail),
        SdkError::ResponseError(_) => RetrievalError::MalformedPage(detail),
        SdkError::ServiceError(service) => {
            let service_err = service.err();
            if service_err.is_resource_not_found_exception() {
                RetrievalError::NotFound(detail)
            } else if service_err.is_invalid_parameter_exception() {
                RetrievalError::InvalidRequest(detail)
            } else if service_err.is_service_unavailable_exception() {
                RetrievalError::Unavailable(detail)
            } else {
                classify_error_code(service_err.code(), detail)
            }
        }
        _ => RetrievalError::Unavailable(detail),
    }
}

/// Map an AWS error code that the operation does not model explicitly
fn classify_error_code(code: Option<&str>, detail: String) -> RetrievalError {
    match code {
        Some(
            "ThrottlingException"
            | "Throttling"
            | "TooManyRequestsException"
            | "RequestLimitExceeded"
            | "LimitExceededException",
        ) => RetrievalError::Throttled(detail),
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "ExpiredTokenException"
            | "InvalidSignatureException"
            | "IncompleteSignature"
            | "MissingAuthenticationToken",
        ) => RetrievalError::AccessDenied(detail),
        Some("InternalFailure" | "InternalServerError" | "ServiceUnavailable") | None => {
            RetrievalError::Unavailable(detail)
        }
        Some(_) => RetrievalError::InvalidRequest(detail),
    }
}
