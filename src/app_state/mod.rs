/// Application state shared by every handler
mod app_state;

pub use app_state::AppState;
