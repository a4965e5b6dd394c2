mod finding;
mod provider;
mod scope;

pub use finding::*;
pub use provider::*;
pub use scope::*;
