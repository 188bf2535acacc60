use snafu::Snafu;

/// Errors produced by the backend client.
///
/// Every variant carries a `stage` marker naming the step that failed so
/// logs stay greppable without backtraces.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("backend base url is empty at {stage}"))]
    MissingBaseUrl { stage: &'static str },

    #[snafu(display("http client construction failed at {stage}: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },

    #[snafu(display("request failed at {stage}: {source}"))]
    Request {
        stage: &'static str,
        source: reqwest::Error,
    },

    #[snafu(display("backend rejected {stage} with status {status}: {detail}"))]
    Rejected {
        stage: &'static str,
        status: u16,
        detail: String,
    },

    #[snafu(display("response decoding failed at {stage}: {source}"))]
    DecodeResponse {
        stage: &'static str,
        source: reqwest::Error,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;
