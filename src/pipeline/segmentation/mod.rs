pub mod matchers;
pub mod roles;
pub mod segmenter;

pub use matchers::*;
pub use roles::*;
pub use segmenter::*;
