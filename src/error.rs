use std::fmt;

#[derive(Debug)]
pub enum NimError {
    ConfigNotFound,
    InvalidIdentity(String),
    AuthorizationFailed { status: u16, body: String },
    AuthorizationInProgress,
    NotAuthorized,
    CatalogUnavailable(String),
    NoImageSelected,
    UploadFailed { status: u16, body: String },
    ReceiptFetchFailed(String),
    DownloadFailed { status: u16, body: String },
    ConnectionError(String),
    IoError(String),
}

impl fmt::Display for NimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NimError::ConfigNotFound => write!(
                f,
                "Config file not found. Please run 'nim authorize --token <token> --save' first"
            ),
            NimError::InvalidIdentity(msg) => write!(f, "Invalid identity: {msg}"),
            NimError::AuthorizationFailed { status, body } => {
                write!(f, "Authorization failed: HTTP {status}")?;
                if !body.is_empty() {
                    write!(f, " - {body}")?;
                }
                Ok(())
            }
            NimError::AuthorizationInProgress => {
                write!(f, "An authorization request is already in progress")
            }
            NimError::NotAuthorized => write!(
                f,
                "No image session key available. Please authorize before making this request"
            ),
            NimError::CatalogUnavailable(msg) => write!(f, "Image catalog unavailable: {msg}"),
            NimError::NoImageSelected => write!(f, "No base image selected, cannot submit"),
            NimError::UploadFailed { status, body } => {
                write!(f, "Image upload failed: HTTP {status}")?;
                if !body.is_empty() {
                    write!(f, " - {body}")?;
                }
                Ok(())
            }
            NimError::ReceiptFetchFailed(msg) => write!(f, "Receipt refresh failed: {msg}"),
            NimError::DownloadFailed { status, body } => {
                write!(f, "Image download failed: HTTP {status}")?;
                if !body.is_empty() {
                    write!(f, " - {body}")?;
                }
                Ok(())
            }
            NimError::ConnectionError(msg) => write!(f, "{msg}"),
            NimError::IoError(msg) => write!(f, "IO Error: {msg}"),
        }
    }
}

impl std::error::Error for NimError {}

impl NimError {
    /// HTTP status carried by the error, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            NimError::AuthorizationFailed { status, .. }
            | NimError::UploadFailed { status, .. }
            | NimError::DownloadFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NimError {
    fn from(err: std::io::Error) -> Self {
        NimError::IoError(err.to_string())
    }
}

pub(crate) fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_connect() {
        "ERROR: Cannot connect to the image maker service. Please check:\n\
         • Is the API URL correct? (Check with: nim config list)\n\
         • Is there a firewall blocking the connection?"
            .to_string()
    } else if err.is_timeout() {
        "TIMEOUT: Connection timed out. The server might be overloaded or unreachable.".to_string()
    } else if err.is_decode() {
        format!("Malformed response: {err}")
    } else {
        format!("Request failed: {err}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        assert!(NimError::ConfigNotFound
            .to_string()
            .contains("Config file not found"));
        assert!(NimError::NoImageSelected
            .to_string()
            .contains("No base image selected"));
        assert!(NimError::NotAuthorized.to_string().contains("authorize"));
        assert!(NimError::AuthorizationInProgress
            .to_string()
            .contains("in progress"));
    }

    #[test]
    fn test_http_errors_surface_status_and_body() {
        let err = NimError::UploadFailed {
            status: 413,
            body: "Payload Too Large".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Image upload failed: HTTP 413 - Payload Too Large"
        );
        assert_eq!(err.status(), Some(413));

        let err = NimError::AuthorizationFailed {
            status: 403,
            body: String::new(),
        };
        assert_eq!(err.to_string(), "Authorization failed: HTTP 403");
        assert_eq!(NimError::NoImageSelected.status(), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let nim_err: NimError = io_err.into();
        assert!(matches!(nim_err, NimError::IoError(_)));
    }
}
