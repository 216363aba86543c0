pub mod proposer;
pub mod validator;

pub use proposer::ProposerCache;
pub use validator::ValidatorRelations;
