pub mod extract;
pub mod response;
pub mod routes;
pub mod users;

pub use response::ApiResponse;
pub use routes::create_router;
