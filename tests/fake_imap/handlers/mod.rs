//! IMAP command handlers for the fake server, one module per command.

mod logout;
mod select;
mod uid_fetch;

pub use capability::handle_capability;
pub use idle::{IdleEnd, Push, handle_idle};
pub use login::handle_login;
pub use logout::handle_logout;
pub use select::handle_select;
pub use uid_fetch::{FetchItem, extract_uids, handle_uid_fetch};
pub use uid_search::handle_uid_search;
