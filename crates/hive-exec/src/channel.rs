//! Master↔worker channel: one canonical signal JSON per line over a Unix socket pair.
use std::{
    io,
    os::{
        fd::{AsRawFd, FromRawFd, RawFd},
        unix::net::UnixStream as StdUnixStream,
    },
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::UnixStream,
};

use hive_model::Signal;

/// Descriptor number the worker finds its end of the channel at.
pub const CHANNEL_FD: RawFd = 3;

/// A connected pair: the master keeps the first end, the child inherits the second.
pub fn socket_pair() -> io::Result<(StdUnixStream, StdUnixStream)> {
    StdUnixStream::pair()
}

/// Move a std stream into the tokio reactor.
pub fn into_async(stream: StdUnixStream) -> io::Result<UnixStream> {
    stream.set_nonblocking(true)?;
    UnixStream::from_std(stream)
}

/// Adopt the inherited descriptor `fd` as the worker's channel.
///
/// # Safety
/// `fd` must be an open Unix stream socket owned by nobody else in this process.
pub unsafe fn adopt(fd: RawFd) -> io::Result<UnixStream> {
    let stream = unsafe { StdUnixStream::from_raw_fd(fd) };
    into_async(stream)
}

/// Newline-delimited frame reader over the channel.
///
/// Frames are raw bytes; text decoding is left to [`Signal::parse`], so a frame that is not UTF-8 is
/// just another malformed signal and the stream stays usable.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    consumed: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
            consumed: false,
        }
    }

    /// Next frame without its terminator; `None` at end of stream.
    ///
    /// Cancel safe: a partially read frame is kept for the next call.
    pub async fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
        if self.consumed {
            self.buf.clear();
            self.consumed = false;
        }
        self.inner.read_until(b'\n', &mut self.buf).await?;
        if self.buf.is_empty() {
            return Ok(None);
        }
        self.consumed = true;
        Ok(Some(self.buf.strip_suffix(b"\n").unwrap_or(&self.buf[..])))
    }
}

/// Write one signal as a single line and flush it.
pub async fn write_signal<W: AsyncWrite + Unpin>(writer: &mut W, signal: &Signal) -> io::Result<()> {
    let mut line = signal.serialize();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Make `fd` survive `execve` as [`CHANNEL_FD`]; runs in the forked child before exec.
pub(crate) fn install_in_child(fd: RawFd) -> io::Result<()> {
    if fd == CHANNEL_FD {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
            return Err(io::Error::last_os_error());
        }
        return Ok(());
    }
    if unsafe { libc::dup2(fd, CHANNEL_FD) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn raw_fd(stream: &StdUnixStream) -> RawFd {
    stream.as_raw_fd()
}

#[cfg(test)]
mod tests {
    use hive_model::{Payload, SignalType};

    use super::*;

    #[tokio::test]
    async fn signals_travel_line_by_line() {
        let (a, b) = socket_pair().unwrap();
        let mut a = into_async(a).unwrap();
        let b = into_async(b).unwrap();

        let status = Signal::new(SignalType::WorkerStatusReq, Some("jar-1".into()));
        let ready = Signal::new(SignalType::WorkerReady, None).with_payload(Payload::new("ts", ["up"]));
        write_signal(&mut a, &status).await.unwrap();
        a.write_all(b"{not json}\n").await.unwrap();
        a.write_all(b"\xff\xfe\n").await.unwrap();
        write_signal(&mut a, &ready).await.unwrap();
        drop(a);

        let mut rx = FrameReader::new(b);
        let mut parsed = Vec::new();
        let mut garbage = 0;
        while let Some(frame) = rx.next_frame().await.unwrap() {
            match Signal::parse(frame) {
                Some(signal) => parsed.push(signal),
                None => garbage += 1,
            }
        }
        assert_eq!(parsed, vec![status, ready]);
        assert_eq!(garbage, 2);
    }

    #[tokio::test]
    async fn unterminated_last_frame_is_returned() {
        let (a, b) = socket_pair().unwrap();
        let mut a = into_async(a).unwrap();
        a.write_all(br#"{"type":"W_M_READY"}"#).await.unwrap();
        drop(a);

        let mut rx = FrameReader::new(into_async(b).unwrap());
        let frame = rx.next_frame().await.unwrap().unwrap().to_vec();
        assert_eq!(Signal::parse(&frame).unwrap().kind(), SignalType::WorkerReady);
        assert!(rx.next_frame().await.unwrap().is_none());
    }
}
