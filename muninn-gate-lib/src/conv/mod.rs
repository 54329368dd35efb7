mod registry;
mod user;

pub use registry::ConvRegistry;
pub use user::User;
