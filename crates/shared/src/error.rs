use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("server reported failure for {resource}")]
    Unsuccessful { resource: String },
    #[error("unexpected content type {content_type:?} for {resource}")]
    UnexpectedContentType {
        resource: String,
        content_type: Option<String>,
    },
    #[error("malformed {resource} body: {source}")]
    Malformed {
        resource: String,
        #[source]
        source: serde_json::Error,
    },
}

impl WireError {
    pub fn unsuccessful(resource: impl Into<String>) -> Self {
        Self::Unsuccessful {
            resource: resource.into(),
        }
    }

    pub fn malformed(resource: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Malformed {
            resource: resource.into(),
            source,
        }
    }
}
