pub mod columns;
pub mod prompt;
pub mod users;
