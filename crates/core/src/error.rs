#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: &'static str, reason: String },
}

impl CoreError {
    /// Shorthand for building a [`CoreError::Validation`].
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// The offending field name for validation errors.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Validation { field, .. } => *field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_field_and_reason() {
        let err = CoreError::validation("interval", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Validation failed: interval: must be at least 1"
        );
        assert_eq!(err.field(), "interval");
    }
}
