pub use mapnotes_api as api;

mod state;

pub use state::SessionState;
