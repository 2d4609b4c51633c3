// Error type for the studio layer.
//
// Wraps score and model errors and adds the session-level failures: asking
// for generation without a model, starting a second generation while one is
// running, and bad candidate or config input.

use cococo_model::CoconetError;
use cococo_score::ScoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("no model loaded")]
    ModelNotLoaded,
    #[error("a generation is already running")]
    Busy,
    #[error("nothing is masked for generation")]
    NothingMasked,
    #[error("no candidate {index} (have {count})")]
    InvalidCandidate { index: usize, count: usize },
    #[error("no candidates to commit")]
    NoCandidates,
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Coconet(#[from] CoconetError),
    #[error(transparent)]
    Score(#[from] ScoreError),
}

pub type Result<T> = std::result::Result<T, StudioError>;
