pub mod configs;
pub mod health;
pub mod jobs;
