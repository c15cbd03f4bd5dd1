
use chrono::{NaiveDateTime, Utc};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
pub trait TimeProvider : Send + Sync {
    fn naive_utc_now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
    ///
    /// Timestamp used in archive file names, unique down to the millisecond
    ///
    fn file_stamp(&self) -> String {
        self.naive_utc_now().format("%Y%m%d-%H%M%S%3f").to_string()
    }
}

pub struct CoreTimeProvider;
impl CoreTimeProvider {
    pub fn new() -> Self {
        Self
    }
}
impl Default for CoreTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}
impl TimeProvider for CoreTimeProvider { }
