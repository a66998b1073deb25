use thiserror::Error;

pub type Result<T, E = ResourceError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("unable to parse timestamp {value:?}")]
    Parse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("request failed")]
    Transport(#[from] reqwest::Error),

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("cannot address an empty version")]
    Addressing,

    #[error("no item found at {0}")]
    NotFound(String),

    #[error("invalid image: {0}")]
    Image(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error("background task failed")]
    Task(#[from] tokio::task::JoinError),

    #[error("unable to load configuration")]
    Config(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ResourceError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl ResourceError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn image(message: impl Into<String>) -> Self {
        Self::Image(message.into())
    }
}

/// Renders an error together with every cause in its chain.
pub fn format_error(e: &(dyn std::error::Error + 'static)) -> String {
    let mut s = String::new();
    s.push_str(&format!("{}", e));
    let mut source = e.source();
    while let Some(cause) = source {
        s.push_str(&format!("\nCaused by: {}", cause));
        source = cause.source();
    }
    s
}
