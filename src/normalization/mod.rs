pub mod boxscore;
pub mod schedule;
