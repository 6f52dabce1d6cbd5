use std::fmt::Display;

/// Every failure of a trajectory run. All variants are fatal: a run that returns one of these
/// produces no output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrajectoryError {
    /// Malformed cell table: missing labels, fewer than two clusters, ragged embeddings
    InvalidInput(String),
    /// The centroid distances do not admit a spanning tree (NaN or infinite distances)
    DisconnectedGraph(String),
    /// A caller supplied option is invalid: unknown root label, bad sampling fraction, ...
    Configuration(String),
}

impl TrajectoryError {
    /// Short name of the error class, used as a prefix in messages
    pub fn kind(&self) -> &'static str {
        match self {
            TrajectoryError::InvalidInput(_) => "invalid input",
            TrajectoryError::DisconnectedGraph(_) => "disconnected graph",
            TrajectoryError::Configuration(_) => "configuration error",
        }
    }

    fn message(&self) -> &str {
        match self {
            TrajectoryError::InvalidInput(m)
            | TrajectoryError::DisconnectedGraph(m)
            | TrajectoryError::Configuration(m) => m,
        }
    }
}

impl std::error::Error for TrajectoryError {}

impl Display for TrajectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}
