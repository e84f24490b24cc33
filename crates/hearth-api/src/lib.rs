pub mod app;
pub mod handlers;
pub mod problem;
pub mod state;

pub use app::build_app;
pub use problem::{ErrorCode, Problem};
pub use state::AppState;
