mod deal;
mod merchant;
mod processed_event;
mod subscription;
mod user;
mod venue;
mod voucher;

pub use deal::*;
pub use merchant::*;
pub use processed_event::*;
pub use subscription::*;
pub use user::*;
pub use venue::*;
pub use voucher::*;
