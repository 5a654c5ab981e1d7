use crate::message::CommandKind;

pub mod config;
pub mod dispatch;
pub mod fetch;
pub mod host;
pub mod message;
pub mod normalize;
pub mod record;
pub mod registry;
pub mod resolve;
pub mod store;
pub mod validate;

#[cfg(test)]
mod tests;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
#[error("{context}: {detail}")]
pub struct Error {
    pub context: CommandKind,
    pub detail: Box<ErrorDetail>,
}

impl Error {
    pub(crate) fn new(context: CommandKind, detail: ErrorDetail) -> Self {
        Self {
            context,
            detail: Box::new(detail),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorDetail {
    #[error(transparent)]
    UnsupportedLinkKind(normalize::NormalizeError),
    #[error(transparent)]
    Network(fetch::NetworkError),
    #[error("transport error ({url}): {error}")]
    Transport { url: String, error: reqwest::Error },
    #[error(transparent)]
    InvalidContent(validate::InvalidContent),
    #[error("no chart record matches {0}")]
    NotFoundInRegistry(String),
    #[error("{0}")]
    Precondition(String),
    #[error("document host: {0}")]
    Host(BoxError),
    #[error("registry: {0}")]
    Registry(registry::RegistryError),
}

impl From<normalize::NormalizeError> for ErrorDetail {
    fn from(error: normalize::NormalizeError) -> Self {
        Self::UnsupportedLinkKind(error)
    }
}

impl From<fetch::FetchError> for ErrorDetail {
    fn from(error: fetch::FetchError) -> Self {
        match error {
            fetch::FetchError::Status(error) => Self::Network(error),
            fetch::FetchError::Transport { url, error } => Self::Transport { url, error },
        }
    }
}

impl From<validate::InvalidContent> for ErrorDetail {
    fn from(error: validate::InvalidContent) -> Self {
        Self::InvalidContent(error)
    }
}

impl From<registry::RegistryError> for ErrorDetail {
    fn from(error: registry::RegistryError) -> Self {
        Self::Registry(error)
    }
}

impl ErrorDetail {
    /// User-facing guidance for this failure. This is the only place message
    /// text is chosen; callers switch on the variant, never on `Display`.
    pub fn guidance(&self) -> String {
        match self {
            Self::UnsupportedLinkKind(_) => "This link is not a chart image. In Google Sheets, \
                 publish the chart (File > Share > Publish to web, choose the chart and \
                 \"Image\") and paste that link."
                .to_owned(),
            Self::Network(error) => match error.status {
                404 => "Chart not found (404). Check that the chart is still published and \
                        the link is complete."
                    .to_owned(),
                403 => "Access denied (403). Make sure the chart is published to the web, \
                        not just shared."
                    .to_owned(),
                status => format!(
                    "The chart server answered {status} {}. Try again later.",
                    error.status_text
                ),
            },
            Self::Transport { .. } => "Could not reach the chart server. Check your \
                 connection; the link may also be blocked by cross-origin rules."
                .to_owned(),
            Self::InvalidContent(error) => format!(
                "The link returned {} instead of an image. Publish the chart as an image \
                 and use that link.",
                if error.content_type.is_empty() {
                    "unrecognised content"
                } else {
                    error.content_type.as_str()
                }
            ),
            Self::NotFoundInRegistry(_) => {
                "This layer is not linked to a known chart. Insert the chart again to track it."
                    .to_owned()
            }
            Self::Precondition(message) => message.clone(),
            Self::Host(error) => format!("The document refused the change: {error}"),
            Self::Registry(_) => "Saved chart data could not be read or written.".to_owned(),
        }
    }
}
