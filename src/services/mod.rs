pub mod broadcasts;
pub mod channel;
pub mod classifier;
pub mod dispatcher;
pub mod drafts;
pub mod feedback;
pub mod init;
pub mod notifications;
pub mod rate;
pub mod telegram;
