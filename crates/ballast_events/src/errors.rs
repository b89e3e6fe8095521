use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("sink closed")]
    SinkClosed,

    #[error("endpoint request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint responded with status: {0}")]
    HttpStatus(http::StatusCode),

    #[error("event serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
