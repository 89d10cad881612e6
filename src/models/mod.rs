pub mod call;
pub mod conversation;
pub mod user;

pub use call::*;
pub use conversation::*;
pub use user::*;
