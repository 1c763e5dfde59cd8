use thiserror::Error;

/// Reasons an instance is rejected before any graph is built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("agent {0} is referenced by the valuations but has no capacity")]
    UnknownAgent(String),
    #[error("item {0} is referenced by the valuations but has no capacity")]
    UnknownItem(String),
    #[error("agent {0} is listed more than once")]
    DuplicateAgent(String),
    #[error("item {0} is listed more than once")]
    DuplicateItem(String),
    #[error("no value for agent {agent} and item {item}")]
    MissingValue { agent: String, item: String },
    #[error("value {value} of agent {agent} for item {item} is not finite")]
    NonFiniteValue {
        agent: String,
        item: String,
        value: f64,
    },
    #[error("entitlement {value} of agent {agent} is not finite")]
    NonFiniteEntitlement { agent: String, value: f64 },
}

/// Failures surfaced by both engines and the facade.
///
/// None of them is retried internally: solving the same instance again gives
/// the same outcome, only different parameters can change it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchingError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InputError),
    /// The flow or matching primitive produced a result that cannot be
    /// decoded into a capacity-respecting assignment.
    #[error("solver invariant violated: {0}")]
    SolverInvariantViolation(String),
    /// Agent and item identifiers overlap, so matched endpoints cannot be
    /// told apart.
    #[error("identifiers shared by agents and items: {0}")]
    NamespaceCollision(String),
}

impl MatchingError {
    pub(crate) fn solver(err: anyhow::Error) -> Self {
        MatchingError::SolverInvariantViolation(format!("{:#}", err))
    }
}
