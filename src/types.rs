use crate::error::NimError;
use anyhow::Result as AnyhowResult;

pub type Result<T> = AnyhowResult<T>;

/// Outcome of a core operation: either the value or a typed failure.
pub type NimResult<T> = std::result::Result<T, NimError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ByteSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        let bytes = self.0;
        match bytes {
            b if b < KB => write!(f, "{} B", b),
            b if b < MB => write!(f, "{:.1} KB", b as f64 / KB as f64),
            b if b < GB => write!(f, "{:.1} MB", b as f64 / MB as f64),
            b => write!(f, "{:.1} GB", b as f64 / GB as f64),
        }
    }
}

/// A fraction in `[0, 1]` rendered as a whole percentage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percent(pub f64);

impl std::fmt::Display for Percent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = (self.0.clamp(0.0, 1.0) * 100.0).round();
        write!(f, "{}%", value as u32)
    }
}
