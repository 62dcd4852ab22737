use std::path::PathBuf;

use thiserror::Error;

use crate::Stage;

#[derive(Debug, Error)]
pub enum ReconstructError {
    /// The cancellation flag was observed.
    #[error("reconstruction cancelled during {0}")]
    Cancelled(Stage),

    #[error("failed to write depth image {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
