pub mod assignments;
pub mod core;
pub mod courses;
pub mod media;
pub mod quiz_submissions;
pub mod quizzes;
pub mod reports;
pub mod users;
pub mod weeks;
