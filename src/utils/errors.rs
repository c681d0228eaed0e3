#![forbid(unsafe_code)]

use poem_openapi::Object;
use serde::Serialize;
use thiserror::Error;

/// Error enumerates the errors returned by this application.
#[derive(Error, Debug)]
pub enum Errors {
    /// Input parameter logging.
    #[error("greeting_server input parameters:\n{}", .0)]
    InputParms(String),

    /// Inaccessible logger configuration file.
    #[error("Unable to access the Log4rs configuration file: {}", .0)]
    Log4rsInitialization(String),

    #[error("Reading application configuration file: {}", .0)]
    ReadingConfigFile(String),

    #[error("Unable to parse TOML file: {}", .0)]
    TOMLParseError(String),

    #[error("Invalid data directory {}: {}", .0, .1)]
    DataDirectory(String, String),

    #[error("Request header {} is not a valid visible ASCII string", .0)]
    InvalidHeader(String),

    #[error("Query parameter {} is not valid percent-encoded UTF-8", .0)]
    InvalidQueryEncoding(String),
}

// ***************************************************************************
//                             HTTP Error Body
// ***************************************************************************
/// Minimal JSON body returned with every non-200 response.
#[derive(Object, Serialize, Debug)]
pub struct HttpResult {
    pub result_code: String,
    pub result_msg: String,
}

impl HttpResult {
    pub fn new(result_code: String, result_msg: String) -> Self {
        Self { result_code, result_msg }
    }
}
