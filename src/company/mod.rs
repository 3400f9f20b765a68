//! Company-name resolution: candidate validation and the ordered strategies.

pub mod resolver;
pub mod validator;

pub use resolver::{
    canonicalize, Candidate, CompanyResolution, CompanyResolver, CompanyStrategy, ResolveContext,
    ResolverEnv,
};
pub use validator::CompanyValidator;
