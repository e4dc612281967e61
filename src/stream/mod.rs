//! C8/C9: the stream buffer/parser driver and the high-level
//! `StreamReader`/`StreamWriter` built on top of it (spec §4.7/§4.8).

pub mod data_buffer;
pub mod parser_buffer;
pub mod parsers;
pub mod reader_writer;
pub mod stream_buffer;

pub use data_buffer::DataBuffer;
pub use parser_buffer::ParserBuffer;
pub use parsers::{ChunkParser, LineParser, Parser, ParserOutcome};
pub use reader_writer::{StreamReader, StreamWriter};
pub use stream_buffer::StreamBuffer;
