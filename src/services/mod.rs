pub mod clock;
pub mod mail;
pub mod push;

pub use clock::{Clock, ManualClock, SystemClock};
pub use mail::{LogMailAdapter, MailAdapter, MailError, MailMessage};
pub use push::{PushController, StorePushController};
