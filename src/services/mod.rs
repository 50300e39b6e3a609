pub mod dispatcher;
pub mod init;
pub mod push;
pub mod whatsapp;
