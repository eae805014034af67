pub use repository::ModelRepository;
pub use scan::ScanSummary;

mod repository;
mod scan;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to access the model index database")]
    Database(#[from] rusqlite::Error),
}
