//! Content sockets
//!
//! A socket is bound to one entry of one archive and opens streams on its
//! content. Passing the opposite socket as `peer` asks for the raw, stored
//! representation of the content so that two archives of the same format
//! can copy an entry without decoding and re-encoding it.

use std::io::{self, Cursor, Read, Seek, Write};

/// Readable and seekable stream
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Sequential output stream with a fallible close
///
/// Dropping a stream without closing it abandons the content written so far.
pub trait OutputStream: Write + Send {
    /// Complete the content and hand it to the sink
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Source of one entry's content
pub trait InputSocket: Send + Sync {
    /// Canonical path of the entry inside its archive
    fn target(&self) -> &str;

    /// Open a sequential stream on the content
    fn stream(&self, peer: Option<&dyn OutputSocket>) -> io::Result<Box<dyn Read + Send>>;

    /// Open a random-access view of the content
    ///
    /// The default reads the whole stream into memory.
    fn channel(&self, peer: Option<&dyn OutputSocket>) -> io::Result<Box<dyn ReadSeek>> {
        let mut content = Vec::new();
        self.stream(peer)?.read_to_end(&mut content)?;
        Ok(Box::new(Cursor::new(content)))
    }
}

/// Sink of one entry's content
pub trait OutputSocket: Send + Sync {
    /// Canonical path of the entry inside its archive
    fn target(&self) -> &str;

    /// Open a sequential stream replacing the content
    fn stream(&self, peer: Option<&dyn InputSocket>) -> io::Result<Box<dyn OutputStream>>;
}

/// Copy an entry between two sockets, each connected to the other
///
/// Returns the number of bytes copied. The output stream is only closed,
/// and so only completed, if the whole input was copied.
pub fn copy(input: &dyn InputSocket, output: &dyn OutputSocket) -> io::Result<u64> {
    let mut source = input.stream(Some(output))?;
    let mut sink = output.stream(Some(input))?;
    let copied = io::copy(&mut source, &mut sink)?;
    sink.close()?;
    Ok(copied)
}
