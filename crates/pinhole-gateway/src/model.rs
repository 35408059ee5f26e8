mod url;
mod user;

pub use url::*;
pub use user::*;
