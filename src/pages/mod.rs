mod auth;
mod builder;
mod dashboard;
mod history;
mod profile;
mod workout;

pub use auth::{Login, Register};
pub use builder::Builder;
pub use dashboard::Dashboard;
pub use history::History;
pub use profile::Profile;
pub use workout::Workout;
