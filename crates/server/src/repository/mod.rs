pub mod submission_repository;
pub mod user_repository;

pub use submission_repository::SeaOrmSubmissionRepository;
pub use user_repository::{CreateUserError, NewUser, SeaOrmUserRepository, UserRecord, UserRepository};
