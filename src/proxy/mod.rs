pub mod body;
mod handler;

pub use body::BoxBody;
pub use handler::handle_request;
