pub mod directory_reader;
pub mod event_reader;
pub mod request_writer;
