//! Error aggregation for reconciliation passes
//!
//! A single `update` touches many workloads and must not abort on the first
//! failure; per-workload errors are collected into a [`CompositeError`] and
//! returned together.

use std::error::Error as StdError;
use std::fmt;

/// Collects independent failures from one reconciliation pass.
///
/// Empty composites convert to `Ok(())` via [`CompositeError::into_result`];
/// non-empty ones render every wrapped error in display output.
#[derive(Debug, Default)]
pub struct CompositeError {
    errors: Vec<anyhow::Error>,
}

impl CompositeError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: anyhow::Error) {
        self.errors.push(err);
    }

    pub fn extend(&mut self, errs: impl IntoIterator<Item = anyhow::Error>) {
        self.errors.extend(errs);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// The individual errors collected during the pass
    pub fn wrapped_errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    /// `Ok(())` when nothing was collected, otherwise `Err(self)`
    pub fn into_result(self) -> Result<(), CompositeError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no errors occurred"),
            [single] => write!(f, "1 error occurred: {single:#}"),
            many => {
                write!(f, "{} errors occurred:", many.len())?;
                for err in many {
                    write!(f, "\n  * {err:#}")?;
                }
                Ok(())
            }
        }
    }
}

impl StdError for CompositeError {}

impl From<anyhow::Error> for CompositeError {
    fn from(err: anyhow::Error) -> Self {
        Self { errors: vec![err] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_empty_composite_is_ok() {
        let composite = CompositeError::new();
        assert!(composite.is_empty());
        assert!(composite.into_result().is_ok());
    }

    #[test]
    fn test_wrapped_errors_are_countable() {
        let mut composite = CompositeError::new();
        composite.push(anyhow!("cannot run workload 'a'"));
        composite.push(anyhow!("cannot run workload 'b'"));
        assert_eq!(composite.len(), 2);

        let err = composite.into_result().unwrap_err();
        assert_eq!(err.wrapped_errors().len(), 2);
        let rendered = err.to_string();
        assert!(rendered.contains("2 errors occurred"));
        assert!(rendered.contains("cannot run workload 'a'"));
        assert!(rendered.contains("cannot run workload 'b'"));
    }

    #[test]
    fn test_single_error_display() {
        let mut composite = CompositeError::new();
        composite.push(anyhow!("Failed to start container"));
        let err = composite.into_result().unwrap_err();
        assert!(err.to_string().contains("Failed to start container"));
    }
}
