pub mod contest;
pub mod problem;
pub mod submission;
pub mod team;
pub mod team_score;
pub mod upload_session;
pub mod user;
