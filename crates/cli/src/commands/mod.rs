pub mod analyze;
pub mod build;
pub mod craft;
pub mod introduce;
pub mod runs;
pub mod util;
pub mod wrappers;

pub use analyze::*;
pub use build::*;
pub use craft::*;
pub use introduce::*;
pub use runs::*;
pub use util::*;
pub use wrappers::*;
