
#[derive(Debug)]
pub struct DataLayerError {
    pub err: Box<dyn std::error::Error + Send + Sync>
}
pub type Result<T> = std::result::Result<T, DataLayerError>;

impl std::fmt::Display for DataLayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "data layer error: {}", self.err)
    }
}

impl std::error::Error for DataLayerError {}

impl From<sqlx::Error> for DataLayerError {
    fn from(value: sqlx::Error) -> Self {
        Self { err: Box::new(value) }
    }
}

impl From<sqlx::migrate::MigrateError> for DataLayerError {
    fn from(value: sqlx::migrate::MigrateError) -> Self {
        Self { err: Box::new(value) }
    }
}
