pub mod activation;
pub mod agencies;
pub mod attachments;
pub mod credentials;
pub mod error;
pub mod feedback;
pub mod middleware;
pub mod notify;
pub mod password;
pub mod routes;
pub mod session;
pub mod state;

pub use error::ApiError;
pub use routes::router;
pub use state::{AppContext, AppState, Settings};
