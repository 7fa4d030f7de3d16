use thiserror::Error;

pub type Result<T> = std::result::Result<T, RandNLAError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RandNLAError {
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("dimension mismatch in {context}: {left_name} is {left} but {right_name} is {right}")]
    DimensionMismatch {
        context: &'static str,
        left_name: &'static str,
        left: usize,
        right_name: &'static str,
        right: usize,
    },

    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("{0} needs a Left or Right cardinality, found Undef")]
    UndefinedCardinality(&'static str),

    #[error("size index {0} is out of range, expected 1 or 2")]
    InvalidSizeIndex(usize),
}

impl RandNLAError {
    pub fn mismatch(
        context: &'static str,
        left_name: &'static str,
        left: usize,
        right_name: &'static str,
        right: usize,
    ) -> Self {
        Self::DimensionMismatch {
            context,
            left_name,
            left,
            right_name,
            right,
        }
    }

    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    /// True for every error that reports inconsistent extents.
    pub fn is_dimension_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidDimensions(_) | Self::DimensionMismatch { .. }
        )
    }
}

/// Fails with a mismatch error unless `left == right`.
pub(crate) fn ensure_eq(
    context: &'static str,
    left_name: &'static str,
    left: usize,
    right_name: &'static str,
    right: usize,
) -> Result<()> {
    if left == right {
        Ok(())
    } else {
        Err(RandNLAError::mismatch(context, left_name, left, right_name, right))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message_names_extents() {
        let err = RandNLAError::mismatch("sketch product", "compressor columns", 10, "operand rows", 12);
        let msg = err.to_string();
        assert!(msg.contains("compressor columns is 10"));
        assert!(msg.contains("operand rows is 12"));
        assert!(err.is_dimension_error());
    }

    #[test]
    fn test_ensure_eq() {
        assert!(ensure_eq("ctx", "a", 3, "b", 3).is_ok());
        let err = ensure_eq("ctx", "a", 3, "b", 4).unwrap_err();
        assert_eq!(err, RandNLAError::mismatch("ctx", "a", 3, "b", 4));
    }
}
