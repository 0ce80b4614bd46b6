use std::fmt;

/// Why an operation stopped without writing anything. Aborts are expected
/// outcomes under concurrency, not errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// The asset's file was replaced after the operation read it.
    SourceChanged,
    /// The asset was destroyed after the operation started.
    AssetMissing,
    /// A before-promotion hook refused the transition.
    Vetoed { hook: String, reason: String },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceChanged => f.write_str("source file changed"),
            Self::AssetMissing => f.write_str("asset no longer exists"),
            Self::Vetoed { hook, reason } => write!(f, "vetoed by '{hook}': {reason}"),
        }
    }
}
