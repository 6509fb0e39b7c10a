pub mod audit;
pub mod batches;
pub mod callbacks;
pub mod content;
pub mod deliveries;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use routes::create_router;
