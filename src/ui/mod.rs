pub mod announcer;
pub mod embeds;
