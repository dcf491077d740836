use grafop_core::Error;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("{context}, expected status 200 but got {status}")]
    Status { status: u16, context: &'static str },
    /// Timeouts, TLS and DNS failures as reported by the transport.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("{context}: invalid json: {source}")]
    Json { context: &'static str, source: serde_json::Error },
    #[error("invalid grafana url: {0}")]
    Url(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict)
    }
}

impl From<url::ParseError> for ClientError {
    fn from(e: url::ParseError) -> Self {
        ClientError::Url(e.to_string())
    }
}

impl From<ClientError> for Error {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::NotFound => Error::NotFound("grafana object".into()),
            ClientError::Conflict => Error::Conflict("grafana object".into()),
            ClientError::Status { status, context } => Error::Remote { status, context: context.into() },
            ClientError::Transport(e) => Error::Network(e.to_string()),
            // a malformed body will not fix itself on retry
            err @ ClientError::Json { .. } => Error::Validation(err.to_string()),
            ClientError::Url(msg) => Error::Fatal(format!("invalid grafana url: {}", msg)),
        }
    }
}
