pub mod admin;
pub mod settings;

use crate::{Data, Error};

/// Every slash command the bot registers.
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![admin::status(), admin::shutdown(), settings::config()]
}
