use crate::errors::DownloaderError;
pub(crate) use std::result::Result as StdResult;

pub type Result<T> = StdResult<T, DownloaderError>;

pub(crate) use tracing::{debug, error, info, trace, warn};
