//! Error kinds shared across the pipeline.
//!
//! Most plumbing uses `anyhow` with context; these typed kinds exist for the
//! few cases the pipeline branches on (a failed build reports and completes,
//! a superseded run stays silent).

/// Errors the pipeline distinguishes by kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Package loading produced errors; no tests run, the run still completes.
    #[error("build failed")]
    BuildFailed,

    /// The pipeline context was cancelled by a newer event or by Stop.
    #[error("task canceled")]
    TaskCanceled,

    /// The selection logic met a block kind it does not model.
    #[error("unsupported entity kind {0}")]
    UnsupportedEntityKind(String),
}

impl Error {
    /// True when `err` is (or wraps) this kind.
    pub fn is(err: &anyhow::Error, kind: &Error) -> bool {
        err.downcast_ref::<Error>() == Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_through_anyhow() {
        let err = anyhow::Error::from(Error::BuildFailed);
        assert!(Error::is(&err, &Error::BuildFailed));
        assert!(!Error::is(&err, &Error::TaskCanceled));
    }
}
