pub type OsdResult<T> = Result<T, OsdError>;

#[derive(thiserror::Error, Debug)]
pub enum OsdError {
    /// The destination pixel format has no viable overlay-format companion,
    /// or a converter backend cannot handle a requested format pair.
    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("scaler error: {0}")]
    Scaler(String),

    #[error("repack error: {0}")]
    Repack(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OsdError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn scaler(msg: impl Into<String>) -> Self {
        Self::Scaler(msg.into())
    }

    pub fn repack(msg: impl Into<String>) -> Self {
        Self::Repack(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            OsdError::unsupported("x")
                .to_string()
                .contains("unsupported format:")
        );
        assert!(OsdError::scaler("x").to_string().contains("scaler error:"));
        assert!(OsdError::repack("x").to_string().contains("repack error:"));
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = OsdError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
